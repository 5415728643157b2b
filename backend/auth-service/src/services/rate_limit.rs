//! OTP delivery rate limiting.
//!
//! Two independent limits guard code delivery: a short per-device cooldown
//! and a per-user daily cap. The failure postures differ on purpose. A cache
//! outage must not lock every 2FA user out of the system, so the cooldown
//! check fails open. The daily cap is the abuse backstop, so it fails closed.

use crate::cache::Cache;
use crate::config::OtpSettings;
use crate::error::{AuthError, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const KEY_PREFIX: &str = "records:otp";

/// Enforces OTP send limits against a shared cache.
#[derive(Clone)]
pub struct OtpRateLimiter {
    cache: Arc<dyn Cache>,
    settings: OtpSettings,
}

impl OtpRateLimiter {
    pub fn new(cache: Arc<dyn Cache>, settings: OtpSettings) -> Self {
        Self { cache, settings }
    }

    /// Check both limits. Returns `OtpCooldown` with the remaining wait when
    /// the per-device cooldown is active, `OtpDailyLimitReached` when the
    /// daily cap is exhausted.
    pub async fn check(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        self.check_cooldown(user_id, device_id).await?;
        self.check_daily_cap(user_id).await
    }

    /// Stamp both counters after a successful delivery.
    pub async fn record_send(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        let now = Utc::now();

        let cooldown_key = cooldown_key(user_id, device_id);
        let expires_at = (now + Duration::seconds(self.settings.cooldown_seconds)).timestamp();
        if let Err(e) = self
            .cache
            .set_string(
                &cooldown_key,
                &expires_at.to_string(),
                self.settings.cooldown_seconds.max(1) as u64,
            )
            .await
        {
            warn!(%user_id, error = %e, "failed to stamp otp cooldown");
        }

        // The daily counter fails closed in both directions: an uncounted
        // send would quietly raise the cap.
        let daily = daily_key(user_id, now);
        let count = match self.cache.get_string(&daily).await? {
            Some(v) => v.parse::<u32>().unwrap_or(0),
            None => 0,
        };
        self.cache
            .set_string(
                &daily,
                &(count + 1).to_string(),
                seconds_until_next_utc_midnight(now),
            )
            .await?;

        Ok(())
    }

    /// Drop the cooldown so a successful verification does not penalize the
    /// next legitimate login from the same device.
    pub async fn clear_cooldown(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        self.cache.remove(&cooldown_key(user_id, device_id)).await
    }

    async fn check_cooldown(&self, user_id: Uuid, device_id: &str) -> Result<()> {
        let key = cooldown_key(user_id, device_id);
        match self.cache.get_string(&key).await {
            Ok(Some(stamp)) => {
                let now = Utc::now().timestamp();
                let expires_at = stamp.parse::<i64>().unwrap_or(now);
                let retry_after_secs = (expires_at - now).max(1);
                Err(AuthError::OtpCooldown { retry_after_secs })
            }
            Ok(None) => Ok(()),
            // Fail open: an unreachable cache must not block all logins
            Err(e) => {
                warn!(%user_id, error = %e, "otp cooldown check skipped, cache unavailable");
                Ok(())
            }
        }
    }

    async fn check_daily_cap(&self, user_id: Uuid) -> Result<()> {
        // Fail closed: a cache error here propagates
        let count = match self.cache.get_string(&daily_key(user_id, Utc::now())).await? {
            Some(v) => v.parse::<u32>().unwrap_or(0),
            None => 0,
        };

        if count >= self.settings.max_daily_attempts {
            return Err(AuthError::OtpDailyLimitReached);
        }
        Ok(())
    }
}

fn cooldown_key(user_id: Uuid, device_id: &str) -> String {
    format!("{KEY_PREFIX}:cooldown:{user_id}:{device_id}")
}

fn daily_key(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!(
        "{KEY_PREFIX}:daily:{user_id}:{:04}-{:02}-{:02}",
        now.year(),
        now.month(),
        now.day()
    )
}

fn seconds_until_next_utc_midnight(now: DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive() + Duration::days(1);
    let midnight = Utc
        .from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default());
    (midnight - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use async_trait::async_trait;

    /// Cache whose reads fail while writes succeed.
    struct ReadFailingCache;

    #[async_trait]
    impl Cache for ReadFailingCache {
        async fn get_string(&self, _key: &str) -> crate::error::Result<Option<String>> {
            Err(AuthError::Cache("read failed".to_string()))
        }

        async fn set_string(
            &self,
            _key: &str,
            _value: &str,
            _ttl_secs: u64,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn settings() -> OtpSettings {
        OtpSettings {
            two_factor_enabled: true,
            cooldown_seconds: 60,
            max_daily_attempts: 3,
            session_window_minutes: 10,
        }
    }

    fn limiter() -> OtpRateLimiter {
        OtpRateLimiter::new(Arc::new(InMemoryCache::new()), settings())
    }

    #[tokio::test]
    async fn first_send_passes_both_limits() {
        let limiter = limiter();
        let user = Uuid::new_v4();
        assert!(limiter.check(user, "device-1").await.is_ok());
    }

    #[tokio::test]
    async fn cooldown_blocks_immediate_resend() {
        let limiter = limiter();
        let user = Uuid::new_v4();

        limiter.check(user, "device-1").await.unwrap();
        limiter.record_send(user, "device-1").await.unwrap();

        match limiter.check(user, "device-1").await {
            Err(AuthError::OtpCooldown { retry_after_secs }) => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected cooldown, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn cooldown_is_per_device() {
        let limiter = limiter();
        let user = Uuid::new_v4();

        limiter.record_send(user, "device-1").await.unwrap();
        assert!(limiter.check(user, "device-2").await.is_ok());
    }

    #[tokio::test]
    async fn daily_cap_blocks_after_limit_across_devices() {
        let limiter = limiter();
        let user = Uuid::new_v4();

        for i in 0..3 {
            limiter
                .record_send(user, &format!("device-{i}"))
                .await
                .unwrap();
        }

        // Fresh device, so only the daily cap can trip
        assert!(matches!(
            limiter.check(user, "device-new").await,
            Err(AuthError::OtpDailyLimitReached)
        ));
    }

    #[tokio::test]
    async fn clearing_cooldown_allows_next_send() {
        let limiter = limiter();
        let user = Uuid::new_v4();

        limiter.record_send(user, "device-1").await.unwrap();
        limiter.clear_cooldown(user, "device-1").await.unwrap();
        assert!(limiter.check(user, "device-1").await.is_ok());
    }

    #[tokio::test]
    async fn daily_cap_check_fails_closed_on_cache_error() {
        let limiter = OtpRateLimiter::new(Arc::new(ReadFailingCache), settings());
        // The cooldown check fails open, so the error that surfaces is the
        // daily cap's.
        assert!(matches!(
            limiter.check(Uuid::new_v4(), "device-1").await,
            Err(AuthError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn uncountable_send_is_an_error_not_a_free_pass() {
        let limiter = OtpRateLimiter::new(Arc::new(ReadFailingCache), settings());
        assert!(matches!(
            limiter.record_send(Uuid::new_v4(), "device-1").await,
            Err(AuthError::Cache(_))
        ));
    }

    #[test]
    fn daily_key_rolls_over_at_utc_midnight() {
        let user = Uuid::new_v4();
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();
        assert_ne!(daily_key(user, before), daily_key(user, after));
    }

    #[test]
    fn midnight_ttl_is_bounded_by_a_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        let ttl = seconds_until_next_utc_midnight(now);
        assert_eq!(ttl, 5 * 3600 + 30 * 60);
    }
}
