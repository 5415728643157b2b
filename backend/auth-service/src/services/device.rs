//! Device registry: identifier resolution and the per-user session ceiling.
//!
//! Every login is bound to a device. The client may send an explicit
//! identifier; when it is absent or malformed the registry falls back to a
//! fingerprint of user agent and IP so repeat logins from the same browser
//! collapse onto one device row. The active-device ceiling is enforced at
//! login time by evicting the least recently used device.

use crate::config::DeviceSettings;
use crate::error::Result;
use crate::models::{DeviceInfo, NewRefreshToken};
use crate::store::{DeviceUpsert, LoginCommit, SessionStore};
use crate::validators::{device_fingerprint, sanitize_device_id};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct DeviceRegistry {
    sessions: Arc<dyn SessionStore>,
    settings: DeviceSettings,
}

impl DeviceRegistry {
    pub fn new(sessions: Arc<dyn SessionStore>, settings: DeviceSettings) -> Self {
        Self { sessions, settings }
    }

    /// Resolve the canonical device identifier for a request.
    pub fn resolve_device_id(info: &DeviceInfo) -> String {
        if let Some(raw) = &info.device_id {
            if let Some(id) = sanitize_device_id(raw) {
                return id;
            }
        }
        device_fingerprint(
            info.user_agent.as_deref().unwrap_or(""),
            info.ip_address.as_deref().unwrap_or(""),
        )
    }

    /// Build the atomic login commit for a user and device, planning an LRU
    /// eviction when a previously unseen device would exceed the ceiling.
    pub async fn plan_login(
        &self,
        user_id: Uuid,
        info: &DeviceInfo,
        new_token: NewRefreshToken,
    ) -> Result<LoginCommit> {
        let device_id = new_token.device_id.clone();

        let evict_device_id = if self
            .sessions
            .find_device(user_id, &device_id)
            .await?
            .map(|d| d.is_active && !d.revoked)
            .unwrap_or(false)
        {
            // Known active device; a re-login never triggers eviction
            None
        } else {
            let active = self.sessions.active_devices(user_id).await?;
            if active.len() >= self.settings.max_active_devices as usize {
                // active_devices is ordered most recent first
                let lru = active.last().map(|d| d.device_id.clone());
                if let Some(evicted) = &lru {
                    info!(%user_id, device_id = %evicted, "evicting least recently used device");
                }
                lru
            } else {
                None
            }
        };

        Ok(LoginCommit {
            user_id,
            device: DeviceUpsert {
                device_id,
                device_name: info.device_name.clone(),
                device_type: info.device_type.clone(),
                os_name: info.os_name.clone(),
                browser: info.browser.clone(),
                ip_address: info.ip_address.clone(),
            },
            evict_device_id,
            new_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_well_formed_id_wins() {
        let info = DeviceInfo {
            device_id: Some("device-abc-123".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        assert_eq!(DeviceRegistry::resolve_device_id(&info), "device-abc-123");
    }

    #[test]
    fn malformed_id_falls_back_to_fingerprint() {
        let info = DeviceInfo {
            device_id: Some("bad id!".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        let resolved = DeviceRegistry::resolve_device_id(&info);
        assert_eq!(resolved, device_fingerprint("Mozilla/5.0", "10.0.0.1"));
    }

    #[test]
    fn missing_id_and_headers_still_resolve_deterministically() {
        let info = DeviceInfo::default();
        let a = DeviceRegistry::resolve_device_id(&info);
        let b = DeviceRegistry::resolve_device_id(&info);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
