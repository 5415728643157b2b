/// Authentication Service Main Entry Point
///
/// Starts the HTTP server with:
/// - PostgreSQL connection pool
/// - Redis connection manager (OTP rate-limit counters)
/// - Email sender (SMTP)
/// - SMS sender (AWS SNS, optional)
/// - Google ID-token verifier (optional)
use anyhow::{Context, Result};
use auth_service::cache::RedisCache;
use auth_service::config::Settings;
use auth_service::http::{start_http_server, AppState};
use auth_service::security::token::TokenService;
use auth_service::security::two_factor_token::TwoFactorTokenProvider;
use auth_service::services::{
    AuthService, DeviceRegistry, GoogleTokenVerifier, JwksGoogleVerifier, LettreEmailSender,
    OtpRateLimiter, SnsSmsSender, TwoFactorService,
};
use auth_service::store::{PgCredentialStore, PgSessionStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "auth_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Authentication Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let cache = RedisCache::connect(&settings.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connection manager initialized");

    let credentials = Arc::new(PgCredentialStore::new(db_pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(db_pool));

    let email = Arc::new(
        LettreEmailSender::new(&settings.email).context("Failed to configure email sender")?,
    );

    let sns_client = if settings.sms.enabled {
        let aws_settings = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Some(aws_sdk_sns::Client::new(&aws_settings))
    } else {
        None
    };
    let sms = Arc::new(SnsSmsSender::new(sns_client, &settings.sms));

    let rate_limiter = OtpRateLimiter::new(Arc::new(cache), settings.otp.clone());
    let two_factor_tokens = TwoFactorTokenProvider::new(settings.otp.session_window_minutes);
    let two_factor = TwoFactorService::new(
        credentials.clone(),
        email.clone(),
        sms,
        rate_limiter,
        two_factor_tokens,
    );

    let tokens = TokenService::new(settings.jwt.clone());
    let devices = DeviceRegistry::new(sessions.clone(), settings.devices.clone());

    let google = settings.google.client_id.clone().map(|client_id| {
        info!("Google federated sign-in enabled");
        Arc::new(JwksGoogleVerifier::new(reqwest::Client::new(), client_id))
            as Arc<dyn GoogleTokenVerifier>
    });

    let auth = Arc::new(AuthService::new(
        credentials,
        sessions,
        devices,
        two_factor,
        tokens.clone(),
        email,
        google,
        settings.tokens.clone(),
        settings.lockout.clone(),
        settings.otp.clone(),
    ));

    let state = AppState { auth, tokens };
    start_http_server(state, &settings.server.host, settings.server.port).await
}
