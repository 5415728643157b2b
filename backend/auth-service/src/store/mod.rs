//! Persistence seams for the authentication core.
//!
//! The orchestrator only ever talks to these traits. `CredentialStore` covers
//! identity records (users, roles, claims, named authentication-token slots);
//! `SessionStore` covers devices and refresh tokens. Multi-row mutations that
//! must not tear (login commit, token rotation, revocation cascades) are
//! expressed as single composite operations so an implementation can wrap
//! them in one transaction.

pub mod postgres;

use crate::error::Result;
use crate::models::{Device, NewRefreshToken, RefreshToken, Role, RoleClaim, SessionView, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use postgres::{PgCredentialStore, PgSessionStore};

/// Refresh-token revocation reasons kept as audit-trail text.
pub mod revocation_reason {
    pub const ROTATED: &str = "Rotated";
    pub const DEVICE_LIMIT: &str = "Device limit exceeded";
    pub const SUPERSEDED: &str = "Superseded by new login";
    pub const LOGGED_OUT: &str = "Logged out";
    pub const DEVICE_REVOKED: &str = "Device revoked";
    pub const OTHER_SESSIONS_TERMINATED: &str = "Other sessions terminated";
}

/// Identity storage: users, roles, claims and named authentication tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve a user by username or email.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>>;
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Record a failed password attempt. Returns the lockout expiry when the
    /// attempt pushed the account over the threshold.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_secs: i64,
    ) -> Result<Option<DateTime<Utc>>>;
    async fn reset_failed_login(&self, user_id: Uuid) -> Result<()>;

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>>;
    async fn claims_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RoleClaim>>;

    async fn confirm_email(&self, user_id: Uuid) -> Result<()>;

    /// External-provider login links (provider, subject) -> user.
    async fn find_login_link(&self, provider: &str, subject: &str) -> Result<Option<Uuid>>;
    async fn create_login_link(&self, user_id: Uuid, provider: &str, subject: &str) -> Result<()>;

    /// Named authentication-token slot keyed (user, purpose, name).
    async fn set_auth_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn get_auth_token(&self, user_id: Uuid, purpose: &str, name: &str)
        -> Result<Option<String>>;
    async fn remove_auth_token(&self, user_id: Uuid, purpose: &str, name: &str) -> Result<()>;
}

/// Device metadata captured at login time.
#[derive(Debug, Clone)]
pub struct DeviceUpsert {
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os_name: Option<String>,
    pub browser: Option<String>,
    pub ip_address: Option<String>,
}

/// Everything a successful primary authentication must persist atomically:
/// the device upsert, an optional LRU eviction, and the new refresh token.
#[derive(Debug, Clone)]
pub struct LoginCommit {
    pub user_id: Uuid,
    pub device: DeviceUpsert,
    /// Device to evict because the ceiling was reached.
    pub evict_device_id: Option<String>,
    pub new_token: NewRefreshToken,
}

/// Device and refresh-token storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_device(&self, user_id: Uuid, device_id: &str) -> Result<Option<Device>>;
    /// Active devices ordered by most recent login first.
    async fn active_devices(&self, user_id: Uuid) -> Result<Vec<Device>>;

    /// Apply a login in one unit of work: evict (if requested), upsert the
    /// device, revoke still-active tokens already bound to it, insert the new
    /// refresh token. No half-applied state may be observable.
    async fn commit_login(&self, commit: LoginCommit) -> Result<Device>;

    /// Look up a stored refresh token by exact value, scoped to a device.
    /// Returns revoked/expired rows too; the caller distinguishes.
    async fn find_refresh_token(
        &self,
        user_id: Uuid,
        device_id: &str,
        token: &str,
    ) -> Result<Option<RefreshToken>>;

    /// Rotation: revoke the old token and insert its successor atomically.
    /// Fails with `RefreshTokenRevoked` when the old token was already
    /// revoked by a concurrent rotation.
    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: NewRefreshToken,
    ) -> Result<RefreshToken>;

    /// Deactivate a device and revoke its tokens. Returns `false` when no
    /// matching active device existed (idempotent no-op).
    async fn revoke_device(&self, user_id: Uuid, device_id: &str, reason: &str) -> Result<bool>;

    /// Revoke every active device except (optionally) one. Returns the number
    /// of devices affected.
    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep_device_id: Option<&str>,
        reason: &str,
    ) -> Result<u64>;

    /// Read-only projection for session listings.
    async fn sessions_overview(&self, user_id: Uuid) -> Result<Vec<SessionView>>;
}
