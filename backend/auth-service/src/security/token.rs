//! Access-token and opaque-token generation.
//!
//! Access tokens are HS256-signed JWTs carrying identity, role and permission
//! claims. Refresh and other opaque tokens are 256-bit random values with no
//! embedded structure; their state lives in the store.

use crate::config::JwtSettings;
use crate::error::{AuthError, Result};
use crate::models::{Role, RoleClaim, User};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Allowance for clock drift between issuer and validators.
const NOT_BEFORE_SKEW_SECS: i64 = 5;

/// Claims embedded in an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User id.
    pub sub: String,
    pub preferred_username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One entry per assigned role.
    pub roles: Vec<String>,
    /// Role claims, deduplicated by (type, value).
    pub claims: Vec<ClaimEntry>,
    /// Authentication method: "mfa" or "pwd".
    pub amr: String,
    pub jti: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEntry {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidToken)
    }
}

/// Cryptographic token lifecycle, independent of persistence.
#[derive(Clone)]
pub struct TokenService {
    settings: JwtSettings,
}

impl TokenService {
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    pub fn access_token_expiry_seconds(&self) -> u64 {
        self.settings.expiry_seconds
    }

    /// Build a signed, time-boxed access token for an authenticated user.
    ///
    /// Fails with `NoRolesAssigned` when the role list is empty: a token
    /// without authorization claims is a configuration error, not a valid
    /// credential.
    pub fn generate_access_token(
        &self,
        user: &User,
        roles: &[Role],
        role_claims: &[RoleClaim],
    ) -> Result<String> {
        if roles.is_empty() {
            return Err(AuthError::NoRolesAssigned);
        }

        // Deduplicate by (type, value); first occurrence wins.
        let mut seen = HashSet::new();
        let claims: Vec<ClaimEntry> = role_claims
            .iter()
            .filter(|c| seen.insert((c.claim_type.clone(), c.claim_value.clone())))
            .map(|c| ClaimEntry {
                claim_type: c.claim_type.clone(),
                value: c.claim_value.clone(),
            })
            .collect();

        let now = Utc::now().timestamp();
        let token_claims = AccessTokenClaims {
            sub: user.id.to_string(),
            preferred_username: user.username.clone(),
            email: user.email.clone(),
            name: user.display_name.clone(),
            roles: roles.iter().map(|r| r.name.clone()).collect(),
            claims,
            amr: if user.two_factor_enabled {
                "mfa".to_string()
            } else {
                "pwd".to_string()
            },
            jti: Uuid::new_v4().to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now,
            nbf: now - NOT_BEFORE_SKEW_SECS,
            exp: now + self.settings.expiry_seconds as i64,
        };

        let key = EncodingKey::from_secret(self.settings.secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), &token_claims, &key)
            .map_err(|e| AuthError::Jwt(e.to_string()))
    }

    /// 256-bit cryptographically secure random value, base64-encoded.
    pub fn generate_refresh_token(&self) -> String {
        Self::generate_secure_token()
    }

    pub fn generate_secure_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Full validation for protected endpoints: signature, expiry, issuer
    /// and audience must all hold.
    pub fn authenticate_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.settings.issuer]);
        validation.set_audience(&self.settings.audience);

        let key = DecodingKey::from_secret(self.settings.secret.as_bytes());
        let data = decode::<AccessTokenClaims>(token, &key, &validation)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(data.claims)
    }

    /// Extract identity claims from an access token whose lifetime may have
    /// lapsed. Signature and structure are still enforced; expiry, issuer and
    /// audience checks are deliberately skipped. Used only during refresh.
    pub fn principal_from_expired_token(&self, token: &str) -> Result<AccessTokenClaims> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }

        // HS256 only; a token signed with any other algorithm is rejected.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let key = DecodingKey::from_secret(self.settings.secret.as_bytes());
        let data = decode::<AccessTokenClaims>(token, &key, &validation)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_settings() -> JwtSettings {
        JwtSettings {
            secret: "unit-test-signing-secret".to_string(),
            issuer: "records-auth".to_string(),
            audience: vec!["records-api".to_string()],
            expiry_seconds: 900,
        }
    }

    fn test_user(two_factor: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            phone_number: None,
            password_hash: String::new(),
            display_name: Some("Alice".to_string()),
            is_active: true,
            two_factor_enabled: two_factor,
            email_verified: true,
            security_stamp: Uuid::new_v4().simple().to_string(),
            locked_until: None,
            failed_login_attempts: 0,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn role(name: &str) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    #[test]
    fn access_token_round_trips_through_expired_principal_extraction() {
        let service = TokenService::new(test_settings());
        let user = test_user(false);

        let token = service
            .generate_access_token(&user, &[role("User")], &[])
            .unwrap();
        let claims = service.principal_from_expired_token(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.preferred_username, "alice");
        assert_eq!(claims.roles, vec!["User"]);
        assert_eq!(claims.amr, "pwd");
        assert!(claims.nbf < claims.iat);
    }

    #[test]
    fn fresh_token_passes_full_validation() {
        let service = TokenService::new(test_settings());
        let user = test_user(false);

        let token = service
            .generate_access_token(&user, &[role("User")], &[])
            .unwrap();
        let claims = service.authenticate_access_token(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user.id);
    }

    #[test]
    fn wrong_audience_fails_full_validation() {
        let service = TokenService::new(test_settings());
        let mut other = test_settings();
        other.audience = vec!["another-api".to_string()];
        let verifier = TokenService::new(other);

        let user = test_user(false);
        let token = service
            .generate_access_token(&user, &[role("User")], &[])
            .unwrap();
        assert!(matches!(
            verifier.authenticate_access_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn mfa_users_get_mfa_authentication_method_claim() {
        let service = TokenService::new(test_settings());
        let user = test_user(true);

        let token = service
            .generate_access_token(&user, &[role("User")], &[])
            .unwrap();
        let claims = service.principal_from_expired_token(&token).unwrap();
        assert_eq!(claims.amr, "mfa");
    }

    #[test]
    fn empty_role_list_is_rejected() {
        let service = TokenService::new(test_settings());
        let user = test_user(false);

        assert!(matches!(
            service.generate_access_token(&user, &[], &[]),
            Err(AuthError::NoRolesAssigned)
        ));
    }

    #[test]
    fn role_claims_deduplicate_first_occurrence_wins() {
        let service = TokenService::new(test_settings());
        let user = test_user(false);
        let r1 = role("Admin");
        let r2 = role("Staff");
        let role_claims = vec![
            RoleClaim {
                role_id: r1.id,
                claim_type: "permission".to_string(),
                claim_value: "students.read".to_string(),
            },
            RoleClaim {
                role_id: r2.id,
                claim_type: "permission".to_string(),
                claim_value: "students.read".to_string(),
            },
            RoleClaim {
                role_id: r2.id,
                claim_type: "permission".to_string(),
                claim_value: "students.write".to_string(),
            },
        ];

        let token = service
            .generate_access_token(&user, &[r1, r2], &role_claims)
            .unwrap();
        let claims = service.principal_from_expired_token(&token).unwrap();

        assert_eq!(claims.claims.len(), 2);
        assert_eq!(claims.claims[0].value, "students.read");
        assert_eq!(claims.claims[1].value, "students.write");
    }

    #[test]
    fn tampered_and_empty_tokens_are_rejected() {
        let service = TokenService::new(test_settings());
        let user = test_user(false);

        let token = service
            .generate_access_token(&user, &[role("User")], &[])
            .unwrap();
        let tampered = format!("{}x", token);

        assert!(matches!(
            service.principal_from_expired_token(&tampered),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service.principal_from_expired_token(""),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn secure_tokens_are_unique_and_long_enough() {
        let a = TokenService::generate_secure_token();
        let b = TokenService::generate_secure_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 chars of unpadded base64
        assert!(a.len() >= 43);
    }
}
