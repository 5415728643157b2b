use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("This account has been disabled")]
    AccountDisabled,

    #[error("Account locked until: {0}")]
    AccountLocked(String),

    #[error("No roles are assigned to this account")]
    NoRolesAssigned,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired two-factor session")]
    InvalidTwoFactorSession,

    #[error("Invalid verification code")]
    InvalidOtpCode,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh token revoked")]
    RefreshTokenRevoked,

    #[error("Please wait {retry_after_secs} seconds before requesting a new code")]
    OtpCooldown { retry_after_secs: i64 },

    #[error("Daily verification code limit reached")]
    OtpDailyLimitReached,

    #[error("Could not deliver the verification code")]
    OtpDeliveryFailed,

    #[error("Device limit exceeded")]
    DeviceLimitExceeded,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("No account is registered for this Google identity")]
    GoogleAccountNotRegistered,

    #[error("Google token verification failed: {0}")]
    GoogleTokenInvalid(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for variants that describe infrastructure trouble rather than a
    /// domain outcome. These are logged with full detail and never shown to
    /// the caller verbatim.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::Database(_)
                | AuthError::Cache(_)
                | AuthError::Jwt(_)
                | AuthError::Internal(_)
        )
    }

    /// User-safe message for the HTTP layer.
    pub fn client_message(&self) -> String {
        if self.is_infrastructure() {
            "Something went wrong, please try again later".to_string()
        } else {
            self.to_string()
        }
    }

    /// HTTP status mapping for the wire protocol.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::InvalidTwoFactorSession
            | AuthError::InvalidOtpCode
            | AuthError::RefreshTokenNotFound
            | AuthError::RefreshTokenExpired
            | AuthError::RefreshTokenRevoked
            | AuthError::GoogleAccountNotRegistered
            | AuthError::GoogleTokenInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::AccountLocked(_) | AuthError::NoRolesAssigned => {
                StatusCode::FORBIDDEN
            }
            AuthError::OtpCooldown { .. } | AuthError::OtpDailyLimitReached => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AuthError::DeviceLimitExceeded => StatusCode::CONFLICT,
            AuthError::DeviceNotFound | AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::OtpDeliveryFailed => StatusCode::BAD_GATEWAY,
            AuthError::Database(_)
            | AuthError::Cache(_)
            | AuthError::Jwt(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        AuthError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        AuthError::Cache(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!("JWT error: {}", err);
        AuthError::Jwt(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
