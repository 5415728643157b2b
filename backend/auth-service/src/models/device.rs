use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Known device for a user. Unique on (user_id, device_id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Client-supplied identifier or fingerprint hash.
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os_name: Option<String>,
    pub browser: Option<String>,
    pub ip_address: Option<String>,
    pub first_login_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Per-request device context, derived once from client headers by the HTTP
/// layer and passed into every operation that needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Raw client-supplied identifier, if any. The registry sanitizes it or
    /// falls back to a fingerprint of `user_agent` + `ip_address`.
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os_name: Option<String>,
    pub browser: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Read-only projection of an active device for session listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os_name: Option<String>,
    pub browser: Option<String>,
    pub ip_address: Option<String>,
    pub last_login_at: DateTime<Utc>,
    /// Whether at least one non-revoked refresh token is bound to the device.
    pub has_active_token: bool,
}
