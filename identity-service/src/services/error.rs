use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use thiserror::Error;

use crate::dtos::{auth::VerificationRequiredResponse, ErrorResponse};

/// Error taxonomy of the authorization engine.
///
/// Every variant maps to a fixed HTTP status and OAuth error code so the
/// SDKs can branch on `error` without parsing prose. Validation failures
/// are raised before any state mutation; `Server` wraps dependency
/// failures without leaking internals.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown client")]
    UnknownClient,

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("origin not allowed")]
    OriginDenied,

    #[error("email not verified")]
    VerificationRequired {
        email: String,
        sdk_request: Option<String>,
    },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account uses a different sign-in method")]
    ProviderMismatch,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Server(#[from] AppError),
}

impl FlowError {
    /// Stable machine-readable code carried in the `error` field and in
    /// redirect query parameters.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlowError::InvalidRequest(_) => "invalid_request",
            FlowError::UnknownClient => "invalid_client",
            FlowError::InvalidGrant(_) => "invalid_grant",
            FlowError::OriginDenied => "access_denied",
            FlowError::VerificationRequired { .. } => "EMAIL_NOT_VERIFIED",
            FlowError::InvalidCredentials => "invalid_credentials",
            FlowError::ProviderMismatch => "provider_mismatch",
            FlowError::Conflict(_) => "conflict",
            FlowError::Server(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FlowError::UnknownClient => StatusCode::UNAUTHORIZED,
            FlowError::InvalidGrant(_) => StatusCode::BAD_REQUEST,
            FlowError::OriginDenied => StatusCode::FORBIDDEN,
            FlowError::VerificationRequired { .. } => StatusCode::FORBIDDEN,
            FlowError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            FlowError::ProviderMismatch => StatusCode::UNAUTHORIZED,
            FlowError::Conflict(_) => StatusCode::CONFLICT,
            FlowError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn description(&self) -> String {
        match self {
            FlowError::InvalidRequest(msg) => msg.clone(),
            FlowError::UnknownClient => "unknown or invalid public key".to_string(),
            FlowError::InvalidGrant(msg) => msg.clone(),
            FlowError::OriginDenied => "request origin is not allowed for this project".to_string(),
            FlowError::VerificationRequired { .. } => {
                "email address is not verified; a verification code has been sent".to_string()
            }
            FlowError::InvalidCredentials => "invalid email or password".to_string(),
            FlowError::ProviderMismatch => {
                "this account was created with a different sign-in method".to_string()
            }
            FlowError::Conflict(msg) => msg.clone(),
            FlowError::Server(_) => "internal error, safe to retry".to_string(),
        }
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::Server(AppError::from(err))
    }
}

impl From<redis::RedisError> for FlowError {
    fn from(err: redis::RedisError) -> Self {
        FlowError::Server(AppError::from(err))
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        if let FlowError::Server(ref err) = self {
            tracing::error!(error = ?err, "flow dependency failure");
        }

        match self {
            FlowError::VerificationRequired { email, sdk_request } => {
                let body = VerificationRequiredResponse {
                    error: "EMAIL_NOT_VERIFIED".to_string(),
                    error_description:
                        "email address is not verified; a verification code has been sent"
                            .to_string(),
                    email,
                    sdk_request,
                };
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
            other => {
                let status = other.status_code();
                let body = ErrorResponse::new(other.error_code(), other.description());
                (status, Json(body)).into_response()
            }
        }
    }
}
