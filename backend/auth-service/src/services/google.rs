//! Google ID-token verification for federated sign-in.
//!
//! Incoming ID tokens are verified cryptographically against Google's
//! published JWKS: RS256 signature, issuer, audience (the configured OAuth
//! client id) and expiry. The key set is cached for an hour and refreshed on
//! a cache miss, which also covers Google's key rotations.

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error, info};

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const JWKS_CACHE_TTL_SECS: i64 = 3600;

static GOOGLE_JWKS_CACHE: Lazy<RwLock<JwksCache>> =
    Lazy::new(|| RwLock::new(JwksCache::default()));

#[derive(Default)]
struct JwksCache {
    keys: HashMap<String, GoogleJwk>,
    fetched_at: Option<DateTime<Utc>>,
}

impl JwksCache {
    fn is_expired(&self) -> bool {
        match self.fetched_at {
            Some(t) => Utc::now() - t > Duration::seconds(JWKS_CACHE_TTL_SECS),
            None => true,
        }
    }
}

/// Verified identity extracted from a Google ID token.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    /// Google's stable subject identifier.
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
}

#[async_trait]
pub trait GoogleTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity>;
}

/// Claims carried by a Google ID token, reduced to what sign-in needs.
#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Individual JWK from Google's key set.
#[derive(Debug, Clone, Deserialize)]
struct GoogleJwk {
    kid: String,
    /// RSA modulus (base64url).
    n: String,
    /// RSA exponent (base64url).
    e: String,
}

#[derive(Debug, Deserialize)]
struct GoogleJwksResponse {
    keys: Vec<GoogleJwk>,
}

/// JWKS-backed verifier used in production.
#[derive(Clone)]
pub struct JwksGoogleVerifier {
    http: Client,
    client_id: String,
}

impl JwksGoogleVerifier {
    pub fn new(http: Client, client_id: String) -> Self {
        Self { http, client_id }
    }
}

#[async_trait]
impl GoogleTokenVerifier for JwksGoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity> {
        let header = decode_header(id_token)
            .map_err(|e| AuthError::GoogleTokenInvalid(format!("invalid token header: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError::GoogleTokenInvalid(format!(
                "unexpected algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::GoogleTokenInvalid("missing key id".to_string()))?;

        let jwk = get_google_public_key(&self.http, &kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::GoogleTokenInvalid(format!("invalid public key: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[&self.client_id]);
        validation.validate_exp = true;

        let token_data = decode::<GoogleIdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        "signature verification failed".to_string()
                    }
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => "token expired".to_string(),
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => "invalid issuer".to_string(),
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                        "invalid audience".to_string()
                    }
                    _ => e.to_string(),
                };
                AuthError::GoogleTokenInvalid(reason)
            })?;

        let claims = token_data.claims;
        let email = claims
            .email
            .ok_or_else(|| AuthError::GoogleTokenInvalid("token carries no email".to_string()))?;

        info!(subject = %claims.sub, "verified Google ID token");
        Ok(GoogleIdentity {
            subject: claims.sub,
            email,
            email_verified: claims.email_verified,
        })
    }
}

async fn fetch_google_jwks(http: &Client) -> Result<Vec<GoogleJwk>> {
    debug!("fetching Google JWKS from {}", GOOGLE_JWKS_URL);

    let response = http
        .get(GOOGLE_JWKS_URL)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| {
            error!("failed to fetch Google JWKS: {}", e);
            AuthError::GoogleTokenInvalid(format!("failed to fetch public keys: {}", e))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        error!("Google JWKS request failed with status: {}", status);
        return Err(AuthError::GoogleTokenInvalid(format!(
            "JWKS request failed: {}",
            status
        )));
    }

    let jwks: GoogleJwksResponse = response.json().await.map_err(|e| {
        AuthError::GoogleTokenInvalid(format!("failed to parse public keys: {}", e))
    })?;

    Ok(jwks.keys)
}

/// Look up a Google signing key by key id, fetching a fresh set on miss.
async fn get_google_public_key(http: &Client, kid: &str) -> Result<GoogleJwk> {
    {
        let cache = GOOGLE_JWKS_CACHE
            .read()
            .map_err(|_| AuthError::Internal("JWKS cache lock poisoned".to_string()))?;
        if !cache.is_expired() {
            if let Some(key) = cache.keys.get(kid) {
                return Ok(key.clone());
            }
        }
    }

    let keys = fetch_google_jwks(http).await?;

    {
        let mut cache = GOOGLE_JWKS_CACHE
            .write()
            .map_err(|_| AuthError::Internal("JWKS cache lock poisoned".to_string()))?;
        cache.keys.clear();
        for key in &keys {
            cache.keys.insert(key.kid.clone(), key.clone());
        }
        cache.fetched_at = Some(Utc::now());
    }

    keys.into_iter()
        .find(|k| k.kid == kid)
        .ok_or_else(|| AuthError::GoogleTokenInvalid("no matching signing key".to_string()))
}
