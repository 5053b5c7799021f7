use axum::{extract::State, response::IntoResponse, Json};

use crate::dtos::auth::{LogoutRequest, MessageResponse, RefreshRequest, TokenRequest, TokenResponse};
use crate::services::error::FlowError;
use crate::utils::{RequestContext, ValidatedJson};
use crate::AppState;

/// Exchange an authorization code for tokens
///
/// The code is consumed atomically before anything else is checked, so
/// a replayed or raced exchange fails with `invalid_grant`.
#[utoipa::path(
    post,
    path = "/sdk/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Code expired, already used, or PKCE failed", body = ErrorResponse),
        (status = 401, description = "Unknown client", body = ErrorResponse),
        (status = 403, description = "Origin not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn token(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, FlowError> {
    let (bundle, events) = state
        .flows
        .exchange_code(
            &req.code,
            req.public_key.as_deref(),
            &req.code_verifier,
            &ctx,
        )
        .await?;
    state.events.dispatch(events);

    Ok(Json(TokenResponse {
        access_token: bundle.access_token,
        refresh_token: bundle.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: bundle.expires_in,
        user: bundle.user,
    }))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/sdk/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenResponse),
        (status = 400, description = "Refresh token invalid, expired, or replayed", body = ErrorResponse),
        (status = 403, description = "Origin not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, FlowError> {
    let (bundle, events) = state.flows.refresh(&req.refresh_token, &ctx).await?;
    state.events.dispatch(events);

    Ok(Json(TokenResponse {
        access_token: bundle.access_token,
        refresh_token: bundle.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: bundle.expires_in,
        user: bundle.user,
    }))
}

/// Invalidate the session behind a refresh token
#[utoipa::path(
    post,
    path = "/sdk/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session closed (idempotent)", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, FlowError> {
    state.flows.logout(&req.refresh_token).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully.".to_string(),
    }))
}
