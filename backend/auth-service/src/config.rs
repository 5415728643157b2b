//! Configuration for the authentication service.
//!
//! Loads settings from environment variables (plus a `.env` file in
//! development builds). Every component receives its settings struct by
//! constructor injection; nothing reads the environment after startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub server: ServerSettings,
    pub jwt: JwtSettings,
    pub tokens: TokenSettings,
    pub otp: OtpSettings,
    pub devices: DeviceSettings,
    pub lockout: LockoutSettings,
    pub email: EmailSettings,
    pub sms: SmsSettings,
    pub google: GoogleSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            server: ServerSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            tokens: TokenSettings::from_env()?,
            otp: OtpSettings::from_env()?,
            devices: DeviceSettings::from_env()?,
            lockout: LockoutSettings::from_env()?,
            email: EmailSettings::from_env()?,
            sms: SmsSettings::from_env(),
            google: GoogleSettings::from_env(),
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            acquire_timeout: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        })
    }
}

/// Redis cache settings (rate-limit counters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
        })
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
        })
    }
}

/// Access-token signing settings (HS256)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expiry_seconds: u64,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        let audience_str = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "records-api".to_string());
        let audience = audience_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        Ok(Self {
            secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "records-auth".to_string()),
            audience,
            expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("Invalid JWT_EXPIRY_SECONDS")?,
        })
    }
}

/// Opaque refresh-token lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    pub refresh_expiry_days: i64,
}

impl TokenSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            refresh_expiry_days: env::var("REFRESH_TOKEN_EXPIRY_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid REFRESH_TOKEN_EXPIRY_DAYS")?,
        })
    }
}

/// Two-factor OTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSettings {
    /// Global switch; individual users must still opt in.
    pub two_factor_enabled: bool,
    pub cooldown_seconds: i64,
    pub max_daily_attempts: u32,
    pub session_window_minutes: i64,
}

impl OtpSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            two_factor_enabled: env::var("TWO_FACTOR_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            cooldown_seconds: env::var("OTP_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid OTP_COOLDOWN_SECONDS")?,
            max_daily_attempts: env::var("OTP_MAX_DAILY_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid OTP_MAX_DAILY_ATTEMPTS")?,
            session_window_minutes: env::var("OTP_SESSION_WINDOW_MINUTES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid OTP_SESSION_WINDOW_MINUTES")?,
        })
    }
}

/// Per-user device ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub max_active_devices: u32,
}

impl DeviceSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            max_active_devices: env::var("MAX_ACTIVE_DEVICES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid MAX_ACTIVE_DEVICES")?,
        })
    }
}

/// Failed-login lockout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutSettings {
    pub max_failed_attempts: i32,
    pub lockout_seconds: i64,
}

impl LockoutSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            max_failed_attempts: env::var("LOCKOUT_MAX_FAILED_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid LOCKOUT_MAX_FAILED_ATTEMPTS")?,
            lockout_seconds: env::var("LOCKOUT_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("Invalid LOCKOUT_SECONDS")?,
        })
    }
}

/// SMTP settings for OTP and password-reset mail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
    /// Outbound transport timeout in seconds.
    pub timeout_seconds: u64,
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .context("Invalid SMTP_PORT")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@records.dev".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            timeout_seconds: env::var("SMTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid SMTP_TIMEOUT_SECONDS")?,
        })
    }
}

/// SMS settings (AWS SNS); unset region/sender means development no-op mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsSettings {
    pub enabled: bool,
    pub sender_id: Option<String>,
}

impl SmsSettings {
    fn from_env() -> Self {
        Self {
            enabled: env::var("SMS_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            sender_id: env::var("SMS_SENDER_ID").ok(),
        }
    }
}

/// Google federated sign-in settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSettings {
    /// OAuth client id; the expected `aud` of incoming ID tokens.
    pub client_id: Option<String>,
}

impl GoogleSettings {
    fn from_env() -> Self {
        Self {
            client_id: env::var("GOOGLE_CLIENT_ID").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_settings_from_env() {
        env::set_var("JWT_SECRET", "test-secret-key");
        env::set_var("JWT_ISSUER", "test-issuer");
        env::set_var("JWT_AUDIENCE", "api,web");
        env::set_var("JWT_EXPIRY_SECONDS", "1200");

        let settings = JwtSettings::from_env().unwrap();

        assert_eq!(settings.secret, "test-secret-key");
        assert_eq!(settings.issuer, "test-issuer");
        assert_eq!(settings.audience, vec!["api", "web"]);
        assert_eq!(settings.expiry_seconds, 1200);

        env::remove_var("JWT_SECRET");
        env::remove_var("JWT_ISSUER");
        env::remove_var("JWT_AUDIENCE");
        env::remove_var("JWT_EXPIRY_SECONDS");
    }

    #[test]
    fn test_otp_settings_defaults() {
        let settings = OtpSettings::from_env().unwrap();

        assert_eq!(settings.cooldown_seconds, 60);
        assert_eq!(settings.max_daily_attempts, 10);
        assert_eq!(settings.session_window_minutes, 10);
    }

    #[test]
    fn test_device_settings_defaults() {
        let settings = DeviceSettings::from_env().unwrap();
        assert_eq!(settings.max_active_devices, 5);
    }
}
