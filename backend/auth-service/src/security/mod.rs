/// Security primitives for the authentication core
///
/// - `password`: Argon2id password hashing and verification
/// - `token`: signed access tokens and opaque refresh tokens
/// - `two_factor_token`: single-use two-factor session tokens
pub mod password;
pub mod token;
pub mod two_factor_token;

pub use password::{hash_password, verify_password};
pub use token::{AccessTokenClaims, TokenService};
pub use two_factor_token::{TwoFactorTokenProvider, TWO_FACTOR_PURPOSE};
