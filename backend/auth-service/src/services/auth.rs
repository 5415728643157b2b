//! Authentication orchestrator.
//!
//! Every externally visible operation lives here: password login, the
//! two-factor continuation, token refresh with rotation, Google federated
//! sign-in, password-reset initiation, and session management. The
//! orchestrator owns policy; persistence and delivery are injected.

use crate::config::{LockoutSettings, OtpSettings, TokenSettings};
use crate::error::{AuthError, Result};
use crate::models::{
    DeviceInfo, GoogleSignInRequest, LoginRequest, NewRefreshToken, PasswordResetRequest,
    RefreshTokenRequest, ResendOtpRequest, SendOtpRequest, SessionView, TwoFactorLoginRequest,
    User,
};
use crate::security::password::verify_password;
use crate::security::token::TokenService;
use crate::services::device::DeviceRegistry;
use crate::services::google::GoogleTokenVerifier;
use crate::services::sender::EmailSender;
use crate::services::two_factor::TwoFactorService;
use crate::store::{revocation_reason, CredentialStore, SessionStore};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

const GOOGLE_PROVIDER: &str = "google";
const PASSWORD_RESET_PURPOSE: &str = "PasswordReset";
const PASSWORD_RESET_TTL_SECS: i64 = 3600;

/// Issued token pair returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    /// Canonical device identifier the session was bound to.
    pub device_id: String,
}

/// Result of primary authentication.
#[derive(Debug)]
pub enum LoginOutcome {
    Success(AuthTokens),
    /// Password accepted; an OTP challenge was issued and must be completed.
    TwoFactorRequired {
        user_id: Uuid,
        two_factor_token: String,
    },
}

/// Result of revoking a single device.
#[derive(Debug, Clone, Serialize)]
pub struct RevokeDeviceOutcome {
    pub revoked: bool,
    /// True when the caller revoked the device it is currently using.
    pub current_device_revoked: bool,
}

pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    devices: DeviceRegistry,
    two_factor: TwoFactorService,
    tokens: TokenService,
    email: Arc<dyn EmailSender>,
    google: Option<Arc<dyn GoogleTokenVerifier>>,
    token_settings: TokenSettings,
    lockout: LockoutSettings,
    otp: OtpSettings,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        devices: DeviceRegistry,
        two_factor: TwoFactorService,
        tokens: TokenService,
        email: Arc<dyn EmailSender>,
        google: Option<Arc<dyn GoogleTokenVerifier>>,
        token_settings: TokenSettings,
        lockout: LockoutSettings,
        otp: OtpSettings,
    ) -> Self {
        Self {
            credentials,
            sessions,
            devices,
            two_factor,
            tokens,
            email,
            google,
            token_settings,
            lockout,
            otp,
        }
    }

    /// Password login. Unknown logins and wrong passwords produce the same
    /// error so the endpoint cannot be used to enumerate accounts.
    pub async fn login(&self, request: &LoginRequest, device: &DeviceInfo) -> Result<LoginOutcome> {
        request.validate()?;

        let Some(user) = self.credentials.find_by_login(request.login.trim()).await? else {
            warn!("login attempt for unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        self.ensure_usable(&user)?;

        if !verify_password(&request.password, &user.password_hash)? {
            let locked_until = self
                .credentials
                .record_failed_login(
                    user.id,
                    self.lockout.max_failed_attempts,
                    self.lockout.lockout_seconds,
                )
                .await?;

            return match locked_until {
                Some(until) => {
                    warn!(user_id = %user.id, "account locked after repeated failures");
                    Err(AuthError::AccountLocked(until.to_rfc3339()))
                }
                None => Err(AuthError::InvalidCredentials),
            };
        }

        // Authorization gate before any challenge is issued: an account with
        // no roles gets no OTP delivery and no session token.
        let roles = self.credentials.roles_for_user(user.id).await?;
        if roles.is_empty() {
            warn!(user_id = %user.id, "login rejected, no roles assigned");
            return Err(AuthError::NoRolesAssigned);
        }

        let device_id = DeviceRegistry::resolve_device_id(device);

        if self.otp.two_factor_enabled && user.two_factor_enabled {
            let two_factor_token = self.two_factor.issue_challenge(&user, &device_id).await?;
            info!(user_id = %user.id, "password accepted, awaiting second factor");
            return Ok(LoginOutcome::TwoFactorRequired {
                user_id: user.id,
                two_factor_token,
            });
        }

        self.credentials.reset_failed_login(user.id).await?;
        let tokens = self.establish_session(&user, device, device_id).await?;
        info!(user_id = %user.id, "login succeeded");
        Ok(LoginOutcome::Success(tokens))
    }

    /// Second step of a two-factor login: consume the challenge and issue the
    /// token pair.
    pub async fn login_with_two_factor(
        &self,
        request: &TwoFactorLoginRequest,
        device: &DeviceInfo,
    ) -> Result<AuthTokens> {
        request.validate()?;

        // A missing user and a stale session token are indistinguishable to
        // the caller.
        let user = self
            .credentials
            .find_by_id(request.user_id)
            .await?
            .ok_or(AuthError::InvalidTwoFactorSession)?;

        self.ensure_usable(&user)?;

        let device_id = DeviceRegistry::resolve_device_id(device);
        self.two_factor
            .verify_challenge(&user, &device_id, &request.two_factor_token, &request.otp_code)
            .await?;

        self.credentials.reset_failed_login(user.id).await?;
        let tokens = self.establish_session(&user, device, device_id).await?;
        info!(user_id = %user.id, "two-factor login succeeded");
        Ok(tokens)
    }

    /// Issue a fresh two-factor challenge outside the login flow. Returns
    /// the session token that must accompany the code at verification.
    pub async fn send_otp(&self, request: &SendOtpRequest, device: &DeviceInfo) -> Result<String> {
        request.validate()?;

        let user = self
            .credentials
            .find_by_id(request.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.ensure_usable(&user)?;

        let device_id = DeviceRegistry::resolve_device_id(device);
        let two_factor_token = self.two_factor.issue_challenge(&user, &device_id).await?;
        info!(user_id = %user.id, "two-factor code sent on request");
        Ok(two_factor_token)
    }

    /// Re-deliver the OTP for an outstanding two-factor challenge.
    pub async fn resend_otp(&self, request: &ResendOtpRequest, device: &DeviceInfo) -> Result<()> {
        request.validate()?;

        let user = self
            .credentials
            .find_by_id(request.user_id)
            .await?
            .ok_or(AuthError::InvalidTwoFactorSession)?;

        self.ensure_usable(&user)?;

        let device_id = DeviceRegistry::resolve_device_id(device);
        self.two_factor
            .resend_challenge(&user, &device_id, &request.two_factor_token)
            .await
    }

    /// Rotate a refresh token and mint a new access token. The old refresh
    /// token is revoked, never deleted. Not-found, expired and revoked are
    /// reported as distinct failures.
    pub async fn refresh(
        &self,
        request: &RefreshTokenRequest,
        device: &DeviceInfo,
    ) -> Result<AuthTokens> {
        request.validate()?;

        let claims = self
            .tokens
            .principal_from_expired_token(&request.access_token)?;
        let user_id = claims.user_id()?;
        let device_id = DeviceRegistry::resolve_device_id(device);

        let stored = self
            .sessions
            .find_refresh_token(user_id, &device_id, &request.refresh_token)
            .await?
            .ok_or(AuthError::RefreshTokenNotFound)?;

        if stored.is_revoked() {
            warn!(%user_id, token_id = %stored.id, "revoked refresh token presented");
            return Err(AuthError::RefreshTokenRevoked);
        }
        if stored.is_expired() {
            return Err(AuthError::RefreshTokenExpired);
        }

        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        self.ensure_usable(&user)?;

        let successor = NewRefreshToken {
            user_id,
            device_id: device_id.clone(),
            token: self.tokens.generate_refresh_token(),
            expires_at: Utc::now() + Duration::days(self.token_settings.refresh_expiry_days),
        };
        let rotated = self
            .sessions
            .rotate_refresh_token(stored.id, successor)
            .await?;

        let access_token = self.issue_access_token(&user).await?;
        info!(%user_id, "refresh token rotated");

        Ok(AuthTokens {
            access_token,
            refresh_token: rotated.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_token_expiry_seconds(),
            device_id,
        })
    }

    /// Federated sign-in with a Google ID token. Only pre-registered accounts
    /// can sign in; there is no auto-provisioning.
    pub async fn google_sign_in(
        &self,
        request: &GoogleSignInRequest,
        device: &DeviceInfo,
    ) -> Result<AuthTokens> {
        request.validate()?;

        let verifier = self
            .google
            .as_ref()
            .ok_or_else(|| AuthError::Validation("Google sign-in is not enabled".to_string()))?;
        let identity = verifier.verify(&request.id_token).await?;

        let user = match self
            .credentials
            .find_login_link(GOOGLE_PROVIDER, &identity.subject)
            .await?
        {
            Some(user_id) => self
                .credentials
                .find_by_id(user_id)
                .await?
                .ok_or(AuthError::GoogleAccountNotRegistered)?,
            None => {
                // First Google sign-in for this subject: link it to an
                // existing account with the same verified email.
                if !identity.email_verified {
                    return Err(AuthError::GoogleTokenInvalid(
                        "email not verified by Google".to_string(),
                    ));
                }
                let user = self
                    .credentials
                    .find_by_email(&identity.email)
                    .await?
                    .ok_or(AuthError::GoogleAccountNotRegistered)?;
                self.credentials
                    .create_login_link(user.id, GOOGLE_PROVIDER, &identity.subject)
                    .await?;
                info!(user_id = %user.id, "linked Google identity to existing account");
                user
            }
        };

        self.ensure_usable(&user)?;

        if !user.email_verified && identity.email_verified {
            self.credentials.confirm_email(user.id).await?;
        }

        self.credentials.reset_failed_login(user.id).await?;
        let device_id = DeviceRegistry::resolve_device_id(device);
        let tokens = self.establish_session(&user, device, device_id).await?;
        info!(user_id = %user.id, "google sign-in succeeded");
        Ok(tokens)
    }

    /// Start a password reset. Always succeeds from the caller's point of
    /// view; whether the email exists is never revealed.
    pub async fn send_password_reset(&self, request: &PasswordResetRequest) -> Result<()> {
        request.validate()?;

        let Some(user) = self.credentials.find_by_email(&request.email).await? else {
            info!("password reset requested for unknown email");
            return Ok(());
        };

        let reset_token = TokenService::generate_secure_token();
        self.credentials
            .set_auth_token(
                user.id,
                PASSWORD_RESET_PURPOSE,
                "email",
                &reset_token,
                Utc::now() + Duration::seconds(PASSWORD_RESET_TTL_SECS),
            )
            .await?;

        self.email
            .send_password_reset(&user.email, &reset_token)
            .await?;
        info!(user_id = %user.id, "password reset email sent");
        Ok(())
    }

    /// Revoke the caller's current device session. Idempotent.
    pub async fn logout(&self, user_id: Uuid, device: &DeviceInfo) -> Result<()> {
        let device_id = DeviceRegistry::resolve_device_id(device);
        let revoked = self
            .sessions
            .revoke_device(user_id, &device_id, revocation_reason::LOGGED_OUT)
            .await?;
        if revoked {
            info!(%user_id, "logged out");
        }
        Ok(())
    }

    /// Revoke every session except the caller's current device. Returns the
    /// number of devices signed out.
    pub async fn terminate_other_sessions(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<u64> {
        let device_id = DeviceRegistry::resolve_device_id(device);
        let count = self
            .sessions
            .revoke_all_except(
                user_id,
                Some(&device_id),
                revocation_reason::OTHER_SESSIONS_TERMINATED,
            )
            .await?;
        info!(%user_id, count, "terminated other sessions");
        Ok(count)
    }

    /// List the caller's active devices, most recently used first.
    pub async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<SessionView>> {
        self.sessions.sessions_overview(user_id).await
    }

    /// Revoke one device by identifier. Reports whether the caller just
    /// revoked the device it is using.
    pub async fn revoke_device(
        &self,
        user_id: Uuid,
        target_device_id: &str,
        device: &DeviceInfo,
    ) -> Result<RevokeDeviceOutcome> {
        let revoked = self
            .sessions
            .revoke_device(user_id, target_device_id, revocation_reason::DEVICE_REVOKED)
            .await?;
        if !revoked {
            return Err(AuthError::DeviceNotFound);
        }

        let current_device_id = DeviceRegistry::resolve_device_id(device);
        info!(%user_id, device_id = %target_device_id, "device revoked");
        Ok(RevokeDeviceOutcome {
            revoked: true,
            current_device_revoked: current_device_id == target_device_id,
        })
    }

    fn ensure_usable(&self, user: &User) -> Result<()> {
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }
        if user.is_locked() {
            let until = user
                .locked_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return Err(AuthError::AccountLocked(until));
        }
        Ok(())
    }

    async fn issue_access_token(&self, user: &User) -> Result<String> {
        let roles = self.credentials.roles_for_user(user.id).await?;
        let role_ids: Vec<Uuid> = roles.iter().map(|r| r.id).collect();
        let role_claims = self.credentials.claims_for_roles(&role_ids).await?;
        self.tokens.generate_access_token(user, &roles, &role_claims)
    }

    /// Mint the token pair and commit device + refresh token in one unit of
    /// work.
    async fn establish_session(
        &self,
        user: &User,
        device: &DeviceInfo,
        device_id: String,
    ) -> Result<AuthTokens> {
        let access_token = self.issue_access_token(user).await?;

        let new_token = NewRefreshToken {
            user_id: user.id,
            device_id,
            token: self.tokens.generate_refresh_token(),
            expires_at: Utc::now() + Duration::days(self.token_settings.refresh_expiry_days),
        };
        let refresh_token = new_token.token.clone();
        let bound_device_id = new_token.device_id.clone();

        let commit = self.devices.plan_login(user.id, device, new_token).await?;
        self.sessions.commit_login(commit).await?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_token_expiry_seconds(),
            device_id: bound_device_id,
        })
    }
}
