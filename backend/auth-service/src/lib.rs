//! Authentication and session management for the student-records platform.
//!
//! Covers password and two-factor login, device-bound refresh-token rotation,
//! Google federated sign-in, OTP rate limiting and session administration.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod security;
pub mod services;
pub mod store;
pub mod validators;

pub use error::{AuthError, Result};
