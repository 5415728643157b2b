use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Input validation utilities for the authentication service

// Compile regex patterns once at startup
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    // This regex is hardcoded and validated - it is a compile-time constant in practice
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid - fix source code")
});

static DEVICE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    // This regex is hardcoded and validated - it is a compile-time constant in practice
    Regex::new(r"^[A-Za-z0-9_-]{8,64}$")
        .expect("hardcoded device id regex is invalid - fix source code")
});

/// Validate email format (RFC 5322 simplified)
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Sanitize a client-supplied device identifier.
///
/// Accepts 8-64 characters of alphanumerics, dash and underscore; anything
/// else is discarded so a forged header cannot smuggle arbitrary bytes into
/// cache keys or SQL parameters.
pub fn sanitize_device_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if DEVICE_ID_REGEX.is_match(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Derive a stable device fingerprint from user agent and IP address.
///
/// Used when the client does not supply an explicit device identifier.
pub fn device_fingerprint(user_agent: &str, ip_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(ip_address.as_bytes());
    hex::encode(hasher.finalize())
}
