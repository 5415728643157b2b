//! Two-factor challenge lifecycle: issue, resend, verify.
//!
//! After a successful password check for a 2FA-enabled user, a challenge is
//! issued: a single-use session token handed back to the client and a 6-digit
//! code delivered out of band. Only the code's SHA-256 digest is persisted.
//! Verification consumes the stored challenge, so a code or session token can
//! never be replayed.

use crate::error::{AuthError, Result};
use crate::models::User;
use crate::security::two_factor_token::{TwoFactorTokenProvider, TWO_FACTOR_PURPOSE};
use crate::services::rate_limit::OtpRateLimiter;
use crate::services::sender::{mask_email, mask_phone, EmailSender, SmsSender};
use crate::store::CredentialStore;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const OTP_LENGTH: u32 = 6;

/// Stored challenge state, keyed per device in the auth-token slot table.
#[derive(Debug, Serialize, Deserialize)]
struct ChallengeRecord {
    session_token: String,
    otp_hash: String,
}

/// Orchestrates two-factor challenges against the credential store.
#[derive(Clone)]
pub struct TwoFactorService {
    credentials: Arc<dyn CredentialStore>,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    rate_limiter: OtpRateLimiter,
    tokens: TwoFactorTokenProvider,
}

impl TwoFactorService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        rate_limiter: OtpRateLimiter,
        tokens: TwoFactorTokenProvider,
    ) -> Self {
        Self {
            credentials,
            email,
            sms,
            rate_limiter,
            tokens,
        }
    }

    /// Issue a fresh challenge after primary authentication. Returns the
    /// session token the client must present alongside the code.
    pub async fn issue_challenge(&self, user: &User, device_id: &str) -> Result<String> {
        self.rate_limiter.check(user.id, device_id).await?;

        let session_token = self.tokens.generate(&user.security_stamp);
        let otp = generate_otp();

        self.store_challenge(user, device_id, &session_token, &otp)
            .await?;
        // Initial issuance tolerates partial delivery; login must not fail
        // because one channel is down.
        self.deliver(user, &otp, false).await?;
        self.rate_limiter.record_send(user.id, device_id).await?;

        info!(user_id = %user.id, "two-factor challenge issued");
        Ok(session_token)
    }

    /// Re-deliver a code for an outstanding challenge. The session token stays
    /// the same; the code is replaced. Requires at least one channel to accept
    /// the message.
    pub async fn resend_challenge(
        &self,
        user: &User,
        device_id: &str,
        session_token: &str,
    ) -> Result<()> {
        self.rate_limiter.check(user.id, device_id).await?;
        self.require_active_challenge(user, device_id, session_token)
            .await?;

        let otp = generate_otp();
        self.store_challenge(user, device_id, session_token, &otp)
            .await?;
        self.deliver(user, &otp, true).await?;
        self.rate_limiter.record_send(user.id, device_id).await?;

        info!(user_id = %user.id, "two-factor code resent");
        Ok(())
    }

    /// Verify a presented (session token, code) pair and consume the
    /// challenge. Either both pass or the challenge stays intact.
    pub async fn verify_challenge(
        &self,
        user: &User,
        device_id: &str,
        session_token: &str,
        otp_code: &str,
    ) -> Result<()> {
        let record = self
            .require_active_challenge(user, device_id, session_token)
            .await?;

        if hash_otp(otp_code.trim()) != record.otp_hash {
            warn!(user_id = %user.id, "two-factor code mismatch");
            return Err(AuthError::InvalidOtpCode);
        }

        // Single use: drop the challenge and the delivery cooldown together
        self.credentials
            .remove_auth_token(user.id, TWO_FACTOR_PURPOSE, &slot_name(device_id))
            .await?;
        self.rate_limiter.clear_cooldown(user.id, device_id).await?;

        info!(user_id = %user.id, "two-factor challenge verified");
        Ok(())
    }

    /// Load the stored challenge and check the presented session token both
    /// cryptographically (expiry, purpose, security stamp) and against the
    /// exact stored value. The two checks are not redundant: the stored
    /// comparison enforces single issuance per device, the cryptographic one
    /// enforces freshness and stamp binding.
    async fn require_active_challenge(
        &self,
        user: &User,
        device_id: &str,
        session_token: &str,
    ) -> Result<ChallengeRecord> {
        let stored = self
            .credentials
            .get_auth_token(user.id, TWO_FACTOR_PURPOSE, &slot_name(device_id))
            .await?
            .ok_or(AuthError::InvalidTwoFactorSession)?;

        let record: ChallengeRecord =
            serde_json::from_str(&stored).map_err(|_| AuthError::InvalidTwoFactorSession)?;

        if !self.tokens.validate(session_token, &user.security_stamp)
            || record.session_token != session_token
        {
            warn!(user_id = %user.id, "invalid two-factor session token");
            return Err(AuthError::InvalidTwoFactorSession);
        }

        Ok(record)
    }

    async fn store_challenge(
        &self,
        user: &User,
        device_id: &str,
        session_token: &str,
        otp: &str,
    ) -> Result<()> {
        let record = ChallengeRecord {
            session_token: session_token.to_string(),
            otp_hash: hash_otp(otp),
        };
        let value = serde_json::to_string(&record)
            .map_err(|e| AuthError::Internal(format!("Failed to encode challenge: {}", e)))?;

        self.credentials
            .set_auth_token(
                user.id,
                TWO_FACTOR_PURPOSE,
                &slot_name(device_id),
                &value,
                Utc::now() + self.tokens.window(),
            )
            .await
    }

    /// Deliver the code over every channel the user has. With
    /// `require_success`, at least one channel must accept the message.
    async fn deliver(&self, user: &User, otp: &str, require_success: bool) -> Result<()> {
        let window_minutes = self.tokens.window().num_minutes();
        let mut delivered = false;

        match self.email.send_otp(&user.email, otp, window_minutes).await {
            Ok(()) => delivered = true,
            Err(e) => {
                warn!(
                    user_id = %user.id,
                    recipient = %mask_email(&user.email),
                    error = %e,
                    "email OTP delivery failed"
                );
            }
        }

        if let Some(phone) = &user.phone_number {
            match self.sms.send_otp(phone, otp, window_minutes).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(
                        user_id = %user.id,
                        phone = %mask_phone(phone),
                        error = %e,
                        "SMS OTP delivery failed"
                    );
                }
            }
        }

        if require_success && !delivered {
            return Err(AuthError::OtpDeliveryFailed);
        }
        Ok(())
    }
}

fn slot_name(device_id: &str) -> String {
    format!("otp:{device_id}")
}

fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..10u32.pow(OTP_LENGTH));
    format!("{:06}", code)
}

fn hash_otp(otp: &str) -> String {
    hex::encode(Sha256::digest(otp.as_bytes()))
}
