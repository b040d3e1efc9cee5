//! Authentication API handlers

use super::ApiJson;
use crate::audit::ClientContext;
use crate::auth::{
    LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse, RegisterRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rehearsal_core::User;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Registration response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub user: User,
}

/// Plain message response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Register a new user account
///
/// Creates the user with a default profile (UTC time zone, no instruments).
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Missing or invalid fields", body = crate::error::ApiError),
        (status = 409, description = "User already exists", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<AppState>,
    ctx: ClientContext,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.register(request, &ctx).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user,
        }),
    ))
}

/// Login with email and password
///
/// Returns a 15-minute access token and a 7-day refresh token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing fields", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    ctx: ClientContext,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.auth.login(request, &ctx).await?;

    Ok(Json(response))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token issued", body = RefreshResponse),
        (status = 401, description = "Missing, invalid or expired refresh token", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<AppState>,
    ctx: ClientContext,
    body: Result<ApiJson<RefreshRequest>, AppError>,
) -> Result<Json<RefreshResponse>, AppError> {
    // A missing or unreadable body carries no token.
    let request = body.map(|ApiJson(request)| request).unwrap_or_default();
    let response = state.auth.refresh(request, &ctx).await?;

    Ok(Json(response))
}

/// Logout
///
/// Requires the refresh token in the body. Tokens stay valid until they
/// expire; the client is expected to discard them.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 400, description = "Refresh token is required", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<AppState>,
    ctx: ClientContext,
    ApiJson(request): ApiJson<LogoutRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.logout(request, &ctx).await?;

    Ok(Json(MessageResponse {
        message: "Logout successful".to_string(),
    }))
}
