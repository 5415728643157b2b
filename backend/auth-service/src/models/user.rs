use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// User model - core identity entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub password_hash: String,
    pub display_name: Option<String>,
    /// Status flag; `false` means the account is blocked.
    pub is_active: bool,
    pub two_factor_enabled: bool,
    pub email_verified: bool,
    /// Invalidation nonce; rotated on any credential-affecting change.
    /// Outstanding two-factor sessions embed it at issuance.
    pub security_stamp: String,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Check if the account is currently locked out
    pub fn is_locked(&self) -> bool {
        if let Some(locked_until) = self.locked_until {
            locked_until > Utc::now()
        } else {
            false
        }
    }
}

/// Role assigned to a user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

/// Permission claim attached to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleClaim {
    pub role_id: Uuid,
    pub claim_type: String,
    pub claim_value: String,
}

/// Login request (HTTP)
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or email address.
    #[validate(length(min = 3, max = 254))]
    pub login: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

/// Two-factor login request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TwoFactorLoginRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub two_factor_token: String,
    #[validate(length(min = 4, max = 10))]
    pub otp_code: String,
}

/// Standalone OTP send request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SendOtpRequest {
    pub user_id: Uuid,
}

/// OTP resend request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ResendOtpRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub two_factor_token: String,
}

/// Token refresh request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1))]
    pub access_token: String,
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Google federated sign-in request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct GoogleSignInRequest {
    #[validate(length(min = 1))]
    pub id_token: String,
}

/// Password reset initiation request
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}
