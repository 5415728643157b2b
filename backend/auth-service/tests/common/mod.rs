//! In-memory test doubles for the persistence and delivery seams.
#![allow(dead_code)]

use async_trait::async_trait;
use auth_service::config::{
    DeviceSettings, JwtSettings, LockoutSettings, OtpSettings, TokenSettings,
};
use auth_service::error::{AuthError, Result};
use auth_service::models::{
    Device, NewRefreshToken, RefreshToken, Role, RoleClaim, SessionView, User,
};
use auth_service::security::hash_password;
use auth_service::security::token::TokenService;
use auth_service::security::two_factor_token::TwoFactorTokenProvider;
use auth_service::services::sender::{EmailSender, SmsSender};
use auth_service::services::{
    AuthService, DeviceRegistry, GoogleIdentity, GoogleTokenVerifier, OtpRateLimiter,
    TwoFactorService,
};
use auth_service::store::{revocation_reason, CredentialStore, LoginCommit, SessionStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use auth_service::cache::InMemoryCache;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    pub users: Mutex<Vec<User>>,
    pub roles: Mutex<HashMap<Uuid, Vec<Role>>>,
    pub role_claims: Mutex<HashMap<Uuid, Vec<RoleClaim>>>,
    pub login_links: Mutex<HashMap<(String, String), Uuid>>,
    pub auth_tokens: Mutex<HashMap<(Uuid, String, String), (String, DateTime<Utc>)>>,
}

impl InMemoryCredentialStore {
    pub fn add_user(&self, user: User, roles: Vec<Role>) {
        self.roles.lock().unwrap().insert(user.id, roles);
        self.users.lock().unwrap().push(user);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == login || u.email.eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_secs: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;

        user.failed_login_attempts += 1;
        if user.failed_login_attempts >= max_attempts {
            user.locked_until = Some(Utc::now() + chrono::Duration::seconds(lockout_secs));
        }
        Ok(user.locked_until.filter(|until| *until > Utc::now()))
    }

    async fn reset_failed_login(&self, user_id: Uuid) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.last_login_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn claims_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RoleClaim>> {
        let claims = self.role_claims.lock().unwrap();
        Ok(role_ids
            .iter()
            .flat_map(|id| claims.get(id).cloned().unwrap_or_default())
            .collect())
    }

    async fn confirm_email(&self, user_id: Uuid) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            user.email_verified = true;
        }
        Ok(())
    }

    async fn find_login_link(&self, provider: &str, subject: &str) -> Result<Option<Uuid>> {
        Ok(self
            .login_links
            .lock()
            .unwrap()
            .get(&(provider.to_string(), subject.to_string()))
            .copied())
    }

    async fn create_login_link(&self, user_id: Uuid, provider: &str, subject: &str) -> Result<()> {
        self.login_links
            .lock()
            .unwrap()
            .insert((provider.to_string(), subject.to_string()), user_id);
        Ok(())
    }

    async fn set_auth_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.auth_tokens.lock().unwrap().insert(
            (user_id, purpose.to_string(), name.to_string()),
            (value.to_string(), expires_at),
        );
        Ok(())
    }

    async fn get_auth_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        name: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .auth_tokens
            .lock()
            .unwrap()
            .get(&(user_id, purpose.to_string(), name.to_string()))
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(value, _)| value.clone()))
    }

    async fn remove_auth_token(&self, user_id: Uuid, purpose: &str, name: &str) -> Result<()> {
        self.auth_tokens
            .lock()
            .unwrap()
            .remove(&(user_id, purpose.to_string(), name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    pub devices: Mutex<Vec<Device>>,
    pub tokens: Mutex<Vec<RefreshToken>>,
}

impl InMemorySessionStore {
    fn revoke_tokens_for(
        tokens: &mut Vec<RefreshToken>,
        user_id: Uuid,
        device_id: &str,
        reason: &str,
    ) {
        for token in tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.device_id == device_id && t.revoked_at.is_none())
        {
            token.revoked_at = Some(Utc::now());
            token.revoked_reason = Some(reason.to_string());
        }
    }

    pub fn tokens_with_reason(&self, reason: &str) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.revoked_reason.as_deref() == Some(reason))
            .count()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_device(&self, user_id: Uuid, device_id: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.user_id == user_id && d.device_id == device_id)
            .cloned())
    }

    async fn active_devices(&self, user_id: Uuid) -> Result<Vec<Device>> {
        let mut active: Vec<Device> = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active && !d.revoked)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_login_at.cmp(&a.last_login_at));
        Ok(active)
    }

    async fn commit_login(&self, commit: LoginCommit) -> Result<Device> {
        let now = Utc::now();
        let mut devices = self.devices.lock().unwrap();
        let mut tokens = self.tokens.lock().unwrap();

        if let Some(evict_id) = &commit.evict_device_id {
            if let Some(device) = devices
                .iter_mut()
                .find(|d| d.user_id == commit.user_id && &d.device_id == evict_id)
            {
                device.is_active = false;
                device.revoked = true;
                device.revoked_at = Some(now);
            }
            Self::revoke_tokens_for(
                &mut tokens,
                commit.user_id,
                evict_id,
                revocation_reason::DEVICE_LIMIT,
            );
        }

        let device = match devices
            .iter_mut()
            .find(|d| d.user_id == commit.user_id && d.device_id == commit.device.device_id)
        {
            Some(existing) => {
                existing.device_name = commit.device.device_name.clone();
                existing.device_type = commit.device.device_type.clone();
                existing.os_name = commit.device.os_name.clone();
                existing.browser = commit.device.browser.clone();
                existing.ip_address = commit.device.ip_address.clone();
                existing.last_login_at = now;
                existing.is_active = true;
                existing.revoked = false;
                existing.revoked_at = None;
                existing.clone()
            }
            None => {
                let device = Device {
                    id: Uuid::new_v4(),
                    user_id: commit.user_id,
                    device_id: commit.device.device_id.clone(),
                    device_name: commit.device.device_name.clone(),
                    device_type: commit.device.device_type.clone(),
                    os_name: commit.device.os_name.clone(),
                    browser: commit.device.browser.clone(),
                    ip_address: commit.device.ip_address.clone(),
                    first_login_at: now,
                    last_login_at: now,
                    is_active: true,
                    revoked: false,
                    revoked_at: None,
                };
                devices.push(device.clone());
                device
            }
        };

        Self::revoke_tokens_for(
            &mut tokens,
            commit.user_id,
            &commit.device.device_id,
            revocation_reason::SUPERSEDED,
        );

        tokens.push(RefreshToken {
            id: Uuid::new_v4(),
            user_id: commit.new_token.user_id,
            device_id: commit.new_token.device_id.clone(),
            token: commit.new_token.token.clone(),
            created_at: now,
            expires_at: commit.new_token.expires_at,
            revoked_at: None,
            revoked_reason: None,
        });

        Ok(device)
    }

    async fn find_refresh_token(
        &self,
        user_id: Uuid,
        device_id: &str,
        token: &str,
    ) -> Result<Option<RefreshToken>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.user_id == user_id && t.device_id == device_id && t.token == token)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: NewRefreshToken,
    ) -> Result<RefreshToken> {
        let mut tokens = self.tokens.lock().unwrap();

        let old = tokens
            .iter_mut()
            .find(|t| t.id == old_token_id)
            .ok_or(AuthError::RefreshTokenNotFound)?;
        if old.revoked_at.is_some() {
            return Err(AuthError::RefreshTokenRevoked);
        }
        old.revoked_at = Some(Utc::now());
        old.revoked_reason = Some(revocation_reason::ROTATED.to_string());

        let inserted = RefreshToken {
            id: Uuid::new_v4(),
            user_id: new_token.user_id,
            device_id: new_token.device_id.clone(),
            token: new_token.token.clone(),
            created_at: Utc::now(),
            expires_at: new_token.expires_at,
            revoked_at: None,
            revoked_reason: None,
        };
        tokens.push(inserted.clone());
        Ok(inserted)
    }

    async fn revoke_device(&self, user_id: Uuid, device_id: &str, reason: &str) -> Result<bool> {
        let mut devices = self.devices.lock().unwrap();
        let mut tokens = self.tokens.lock().unwrap();

        let Some(device) = devices
            .iter_mut()
            .find(|d| d.user_id == user_id && d.device_id == device_id && !d.revoked)
        else {
            return Ok(false);
        };
        device.is_active = false;
        device.revoked = true;
        device.revoked_at = Some(Utc::now());

        Self::revoke_tokens_for(&mut tokens, user_id, device_id, reason);
        Ok(true)
    }

    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep_device_id: Option<&str>,
        reason: &str,
    ) -> Result<u64> {
        let mut devices = self.devices.lock().unwrap();
        let mut tokens = self.tokens.lock().unwrap();
        let keep = keep_device_id.unwrap_or("");
        let mut count = 0;

        let revoked_ids: Vec<String> = devices
            .iter_mut()
            .filter(|d| d.user_id == user_id && d.device_id != keep && !d.revoked)
            .map(|d| {
                d.is_active = false;
                d.revoked = true;
                d.revoked_at = Some(Utc::now());
                count += 1;
                d.device_id.clone()
            })
            .collect();

        for device_id in revoked_ids {
            Self::revoke_tokens_for(&mut tokens, user_id, &device_id, reason);
        }
        Ok(count)
    }

    async fn sessions_overview(&self, user_id: Uuid) -> Result<Vec<SessionView>> {
        let tokens = self.tokens.lock().unwrap();
        let mut views: Vec<SessionView> = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active && !d.revoked)
            .map(|d| SessionView {
                device_id: d.device_id.clone(),
                device_name: d.device_name.clone(),
                device_type: d.device_type.clone(),
                os_name: d.os_name.clone(),
                browser: d.browser.clone(),
                ip_address: d.ip_address.clone(),
                last_login_at: d.last_login_at,
                has_active_token: tokens.iter().any(|t| {
                    t.user_id == user_id
                        && t.device_id == d.device_id
                        && t.revoked_at.is_none()
                        && t.expires_at > Utc::now()
                }),
            })
            .collect();
        views.sort_by(|a, b| b.last_login_at.cmp(&a.last_login_at));
        Ok(views)
    }
}

/// Email sender that records every code it was asked to deliver.
#[derive(Default)]
pub struct CapturingEmailSender {
    pub sent_codes: Mutex<Vec<String>>,
}

impl CapturingEmailSender {
    pub fn last_code(&self) -> Option<String> {
        self.sent_codes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EmailSender for CapturingEmailSender {
    async fn send_otp(&self, _recipient: &str, code: &str, _window_minutes: i64) -> Result<()> {
        self.sent_codes.lock().unwrap().push(code.to_string());
        Ok(())
    }

    async fn send_password_reset(&self, _recipient: &str, token: &str) -> Result<()> {
        self.sent_codes.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

/// SMS sender that always fails, for delivery-degradation tests.
pub struct FailingSmsSender;

#[async_trait]
impl SmsSender for FailingSmsSender {
    async fn send_otp(&self, _phone: &str, _code: &str, _window_minutes: i64) -> Result<()> {
        Err(AuthError::OtpDeliveryFailed)
    }
}

/// Google verifier that accepts any token and returns a fixed identity.
pub struct StubGoogleVerifier(pub GoogleIdentity);

#[async_trait]
impl GoogleTokenVerifier for StubGoogleVerifier {
    async fn verify(&self, _id_token: &str) -> Result<GoogleIdentity> {
        Ok(self.0.clone())
    }
}

/// Everything a test needs to drive the orchestrator.
pub struct TestHarness {
    pub auth: AuthService,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub email: Arc<CapturingEmailSender>,
    pub tokens: TokenService,
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret".to_string(),
        issuer: "records-auth".to_string(),
        audience: vec!["records-api".to_string()],
        expiry_seconds: 900,
    }
}

pub fn harness_with_device_limit(max_active_devices: u32) -> TestHarness {
    build_harness(max_active_devices, None)
}

pub fn harness_with_google(identity: GoogleIdentity) -> TestHarness {
    build_harness(
        5,
        Some(Arc::new(StubGoogleVerifier(identity)) as Arc<dyn GoogleTokenVerifier>),
    )
}

fn build_harness(
    max_active_devices: u32,
    google: Option<Arc<dyn GoogleTokenVerifier>>,
) -> TestHarness {
    let credentials = Arc::new(InMemoryCredentialStore::default());
    let sessions = Arc::new(InMemorySessionStore::default());
    let email = Arc::new(CapturingEmailSender::default());

    let otp = OtpSettings {
        two_factor_enabled: true,
        cooldown_seconds: 60,
        max_daily_attempts: 10,
        session_window_minutes: 10,
    };
    let rate_limiter = OtpRateLimiter::new(Arc::new(InMemoryCache::new()), otp.clone());
    let two_factor = TwoFactorService::new(
        credentials.clone(),
        email.clone(),
        Arc::new(FailingSmsSender),
        rate_limiter,
        TwoFactorTokenProvider::new(otp.session_window_minutes),
    );

    let tokens = TokenService::new(jwt_settings());
    let devices = DeviceRegistry::new(
        sessions.clone(),
        DeviceSettings { max_active_devices },
    );

    let auth = AuthService::new(
        credentials.clone(),
        sessions.clone(),
        devices,
        two_factor,
        tokens.clone(),
        email.clone(),
        google,
        TokenSettings {
            refresh_expiry_days: 30,
        },
        LockoutSettings {
            max_failed_attempts: 3,
            lockout_seconds: 900,
        },
        otp,
    );

    TestHarness {
        auth,
        credentials,
        sessions,
        email,
        tokens,
    }
}

pub fn harness() -> TestHarness {
    harness_with_device_limit(5)
}

pub const TEST_PASSWORD: &str = "Correct-Horse9!";

pub fn make_user(username: &str, two_factor_enabled: bool) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        phone_number: None,
        password_hash: hash_password(TEST_PASSWORD).unwrap(),
        display_name: None,
        is_active: true,
        two_factor_enabled,
        email_verified: true,
        security_stamp: Uuid::new_v4().simple().to_string(),
        locked_until: None,
        failed_login_attempts: 0,
        last_login_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn staff_role() -> Role {
    Role {
        id: Uuid::new_v4(),
        name: "Staff".to_string(),
    }
}
