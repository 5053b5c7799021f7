use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::dtos::auth::{
    IssuedCodeResponse, LoginLocalRequest, MessageResponse, RegisterRequest, RegisterResponse,
    ResendVerificationRequest, VerifyOtpRequest, VerifyOtpResponse,
};
use crate::services::error::FlowError;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Register a local account
///
/// The account starts unverified; a verification code is emailed and
/// must be redeemed before the first login completes.
#[utoipa::path(
    post,
    path = "/sdk/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification code sent", body = RegisterResponse),
        (status = 401, description = "Unknown public key", body = ErrorResponse),
        (status = 409, description = "Email or username already in use", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Local Provider"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, FlowError> {
    let user = state
        .flows
        .register_local(
            &req.public_key,
            &req.email,
            &req.password,
            req.username.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: "Registration successful. Check your email for a verification code."
                .to_string(),
        }),
    ))
}

/// Email/password login against a pending authorization request
#[utoipa::path(
    post,
    path = "/sdk/login-local",
    request_body = LoginLocalRequest,
    responses(
        (status = 200, description = "Authorization code issued", body = IssuedCodeResponse),
        (status = 400, description = "Request expired or wrong provider", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = VerificationRequiredResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Local Provider"
)]
pub async fn login_local(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginLocalRequest>,
) -> Result<impl IntoResponse, FlowError> {
    let (code, events) = state
        .flows
        .login_local(&req.public_key, &req.sdk_request, &req.email, &req.password)
        .await?;
    state.events.dispatch(events);

    Ok(Json(IssuedCodeResponse {
        code: code.code,
        state: code.state,
        redirect_uri: code.redirect_uri,
    }))
}

/// Redeem an emailed verification code
///
/// With `sdk_request` the pending authorization request resumes and the
/// response carries a fresh code; without it only the account flips to
/// verified.
#[utoipa::path(
    post,
    path = "/sdk/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Email verified", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorResponse),
        (status = 401, description = "Unknown public key", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Local Provider"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, FlowError> {
    let (user, code, events) = state
        .flows
        .verify_otp(
            &req.public_key,
            &req.email,
            &req.otp,
            req.sdk_request.as_deref(),
        )
        .await?;
    state.events.dispatch(events);

    let response = match code {
        Some(code) => VerifyOtpResponse {
            verified: true,
            user,
            code: Some(code.code),
            state: code.state,
            redirect_uri: Some(code.redirect_uri),
        },
        None => VerifyOtpResponse {
            verified: true,
            user,
            code: None,
            state: None,
            redirect_uri: None,
        },
    };
    Ok(Json(response))
}

/// Resend the verification code
///
/// Always answers 200 with a generic message so the endpoint cannot be
/// used to enumerate accounts.
#[utoipa::path(
    post,
    path = "/sdk/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Generic acknowledgement", body = MessageResponse),
        (status = 401, description = "Unknown public key", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Local Provider"
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResendVerificationRequest>,
) -> Result<impl IntoResponse, FlowError> {
    state
        .flows
        .resend_verification(&req.public_key, &req.email)
        .await?;

    Ok(Json(MessageResponse {
        message: "If the account exists, a new code has been sent.".to_string(),
    }))
}
