//! Single-use two-factor session tokens.
//!
//! A session token bridges the short window between password verification and
//! OTP verification. It is self-contained rather than a database row: the
//! payload embeds its own expiry, a purpose tag and the user's security stamp
//! at issuance. Rotating the stamp (password change, 2FA toggle) silently
//! invalidates every outstanding session for that user.
//!
//! Single-use enforcement lives in the store: the orchestrator persists the
//! token as a named authentication-token entry and removes it on successful
//! verification.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

pub const TWO_FACTOR_PURPOSE: &str = "TwoFactor";

const SEGMENT_COUNT: usize = 4;

/// Issues and validates two-factor session tokens.
#[derive(Clone)]
pub struct TwoFactorTokenProvider {
    window: Duration,
}

impl TwoFactorTokenProvider {
    pub fn new(window_minutes: i64) -> Self {
        Self {
            window: Duration::minutes(window_minutes),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Mint a session token bound to the user's current security stamp.
    pub fn generate(&self, security_stamp: &str) -> String {
        self.generate_at(security_stamp, Utc::now())
    }

    fn generate_at(&self, security_stamp: &str, now: DateTime<Utc>) -> String {
        let mut nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let expires_at = (now + self.window).timestamp();
        let payload = format!(
            "{}:{}:{}:{}",
            STANDARD.encode(nonce),
            expires_at,
            TWO_FACTOR_PURPOSE,
            security_stamp
        );
        STANDARD.encode(payload)
    }

    /// Validate a presented token against the user's current security stamp.
    ///
    /// Requires: well-formed payload with the exact segment count, expiry in
    /// the future, purpose match, and stamp equality. Any parse failure or
    /// mismatch yields `false`; there is no partial credit.
    pub fn validate(&self, token: &str, current_security_stamp: &str) -> bool {
        self.validate_at(token, current_security_stamp, Utc::now())
    }

    fn validate_at(&self, token: &str, current_security_stamp: &str, now: DateTime<Utc>) -> bool {
        let Ok(decoded) = STANDARD.decode(token.trim()) else {
            return false;
        };
        let Ok(payload) = String::from_utf8(decoded) else {
            return false;
        };

        let segments: Vec<&str> = payload.split(':').collect();
        if segments.len() != SEGMENT_COUNT {
            return false;
        }

        let Ok(expires_at) = segments[1].parse::<i64>() else {
            return false;
        };
        if expires_at <= now.timestamp() {
            return false;
        }

        segments[2] == TWO_FACTOR_PURPOSE && segments[3] == current_security_stamp
    }
}
