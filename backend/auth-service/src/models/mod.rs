/// Data models for the authentication core
pub mod device;
pub mod token;
pub mod user;

pub use device::{Device, DeviceInfo, SessionView};
pub use token::{NewRefreshToken, RefreshToken};
pub use user::{
    GoogleSignInRequest, LoginRequest, PasswordResetRequest, RefreshTokenRequest, ResendOtpRequest,
    Role, RoleClaim, SendOtpRequest, TwoFactorLoginRequest, User,
};
