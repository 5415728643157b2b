pub mod auth;
pub mod device;
pub mod google;
pub mod rate_limit;
pub mod sender;
pub mod two_factor;

pub use auth::{AuthService, AuthTokens, LoginOutcome, RevokeDeviceOutcome};
pub use device::DeviceRegistry;
pub use google::{GoogleIdentity, GoogleTokenVerifier, JwksGoogleVerifier};
pub use rate_limit::OtpRateLimiter;
pub use sender::{EmailSender, LettreEmailSender, SmsSender, SnsSmsSender};
pub use two_factor::TwoFactorService;
