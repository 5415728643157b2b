//! HTTP API for the authentication service.
//!
//! Thin translation layer: handlers parse the request, derive the per-request
//! device context from headers, call the orchestrator and map the outcome to
//! JSON. Protected endpoints authenticate with a Bearer access token.

use crate::error::AuthError;
use crate::models::{
    DeviceInfo, GoogleSignInRequest, LoginRequest, PasswordResetRequest, RefreshTokenRequest,
    ResendOtpRequest, SendOtpRequest, TwoFactorLoginRequest,
};
use crate::security::token::TokenService;
use crate::services::{AuthService, LoginOutcome};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub tokens: TokenService,
}

/// Build the router with every public endpoint.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .route("/auth/login/2fa", post(login_two_factor))
        .route("/auth/otp/send", post(send_otp))
        .route("/auth/otp/resend", post(resend_otp))
        .route("/auth/refresh", post(refresh))
        .route("/auth/google", post(google_sign_in))
        .route("/auth/password-reset", post(password_reset))
        .route("/auth/logout", post(logout))
        .route("/auth/sessions", get(list_sessions))
        .route("/auth/sessions/terminate-others", post(terminate_others))
        .route("/auth/devices/:device_id/revoke", post(revoke_device))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start_http_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting authentication HTTP server on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    let outcome = state.auth.login(&request, &device).await?;

    Ok(match outcome {
        LoginOutcome::Success(tokens) => (StatusCode::OK, Json(json!(tokens))).into_response(),
        LoginOutcome::TwoFactorRequired {
            user_id,
            two_factor_token,
        } => (
            StatusCode::OK,
            Json(json!({
                "two_factor_required": true,
                "user_id": user_id,
                "two_factor_token": two_factor_token,
            })),
        )
            .into_response(),
    })
}

async fn login_two_factor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorLoginRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    let tokens = state.auth.login_with_two_factor(&request, &device).await?;
    Ok((StatusCode::OK, Json(json!(tokens))).into_response())
}

async fn send_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendOtpRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    let two_factor_token = state.auth.send_otp(&request, &device).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "user_id": request.user_id,
            "two_factor_token": two_factor_token,
        })),
    )
        .into_response())
}

async fn resend_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResendOtpRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    state.auth.resend_otp(&request, &device).await?;
    Ok((StatusCode::OK, Json(json!({ "sent": true }))).into_response())
}

async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    let tokens = state.auth.refresh(&request, &device).await?;
    Ok((StatusCode::OK, Json(json!(tokens))).into_response())
}

async fn google_sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GoogleSignInRequest>,
) -> Result<Response, ApiError> {
    let device = device_info_from_headers(&headers);
    let tokens = state.auth.google_sign_in(&request, &device).await?;
    Ok((StatusCode::OK, Json(json!(tokens))).into_response())
}

async fn password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Response, ApiError> {
    state.auth.send_password_reset(&request).await?;
    // Always the same answer, whether or not the email exists
    Ok((StatusCode::OK, Json(json!({ "sent": true }))).into_response())
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let device = device_info_from_headers(&headers);
    state.auth.logout(user_id, &device).await?;
    Ok((StatusCode::OK, Json(json!({ "logged_out": true }))).into_response())
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let sessions = state.auth.active_sessions(user_id).await?;
    Ok((StatusCode::OK, Json(json!({ "sessions": sessions }))).into_response())
}

async fn terminate_others(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let device = device_info_from_headers(&headers);
    let count = state.auth.terminate_other_sessions(user_id, &device).await?;
    Ok((StatusCode::OK, Json(json!({ "terminated": count }))).into_response())
}

async fn revoke_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let device = device_info_from_headers(&headers);
    let outcome = state.auth.revoke_device(user_id, &device_id, &device).await?;
    Ok((StatusCode::OK, Json(json!(outcome))).into_response())
}

/// Resolve the caller from the Bearer access token.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::InvalidToken)?;

    let claims = state.tokens.authenticate_access_token(token)?;
    Ok(claims.user_id()?)
}

/// Device context carried in request headers.
pub fn device_info_from_headers(headers: &HeaderMap) -> DeviceInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let ip_address = header("x-forwarded-for")
        .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
        .filter(|v| !v.is_empty());

    DeviceInfo {
        device_id: header("x-device-id"),
        device_name: header("x-device-name"),
        device_type: header("x-device-type"),
        os_name: header("x-device-os"),
        browser: header("x-device-browser"),
        ip_address,
        user_agent: header("user-agent"),
    }
}

/// Wrapper so `?` works in handlers while the error mapping stays in one
/// place.
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.is_infrastructure() {
            tracing::error!(error = %err, "request failed");
        }

        let mut body = json!({ "error": err.client_message() });
        if let AuthError::OtpCooldown { retry_after_secs } = &err {
            body["retry_after_secs"] = json!(retry_after_secs);
        }

        (err.status_code(), Json(body)).into_response()
    }
}
