use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::SanitizedEndUser;

/// Query parameters for `GET /sdk/authorize`.
///
/// Field names are camelCase on the wire because that is what the
/// browser SDKs send.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AuthorizeQuery {
    #[validate(length(min = 1, message = "publicKey is required"))]
    #[param(example = "pk_live_9f8e7d6c")]
    pub public_key: String,

    #[validate(url(message = "redirectUri must be an absolute URL"))]
    #[param(example = "https://app.example.com/callback")]
    pub redirect_uri: String,

    #[validate(length(min = 1, message = "provider is required"))]
    #[param(example = "google")]
    pub provider: String,

    #[validate(length(min = 43, max = 128, message = "codeChallenge has invalid length"))]
    #[param(example = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM")]
    pub code_challenge: String,

    /// Only `S256` is accepted. Missing defaults to `S256`.
    #[param(example = "S256")]
    pub code_challenge_method: Option<String>,

    /// Opaque CSRF value echoed back to the redirect URI.
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "publicKey is required"))]
    #[serde(rename = "publicKey")]
    #[schema(example = "pk_live_9f8e7d6c")]
    pub public_key: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "Passw0rd!", min_length = 8)]
    pub password: String,

    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    #[schema(example = "jane")]
    pub username: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: SanitizedEndUser,
    #[schema(example = "Registration successful. Check your email for a verification code.")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginLocalRequest {
    #[validate(length(min = 1, message = "publicKey is required"))]
    #[serde(rename = "publicKey")]
    #[schema(example = "pk_live_9f8e7d6c")]
    pub public_key: String,

    /// Id of the pending authorization request this login resumes.
    #[validate(length(min = 1, message = "sdk_request is required"))]
    #[schema(example = "9b2f1c0a4e5d6f708192a3b4c5d6e7f8")]
    pub sdk_request: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Passw0rd!")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 1, message = "publicKey is required"))]
    #[serde(rename = "publicKey")]
    #[schema(example = "pk_live_9f8e7d6c")]
    pub public_key: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    #[schema(example = "482913")]
    pub otp: String,

    /// When present, a successful verification resumes the pending
    /// authorization request and the response carries a code.
    pub sdk_request: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResendVerificationRequest {
    #[validate(length(min = 1, message = "publicKey is required"))]
    #[serde(rename = "publicKey")]
    #[schema(example = "pk_live_9f8e7d6c")]
    pub public_key: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

/// Body of `POST /sdk/token`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "code is required"))]
    #[schema(example = "3f9a...64 hex chars")]
    pub code: String,

    /// Optional client identification. When supplied it must match the
    /// project the code was issued for.
    #[schema(example = "pk_live_9f8e7d6c")]
    pub public_key: Option<String>,

    #[validate(length(min = 43, max = 128, message = "codeVerifier has invalid length"))]
    #[schema(example = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk")]
    pub code_verifier: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "refreshToken is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "refreshToken is required"))]
    pub refresh_token: String,
}

/// Successful token exchange / refresh payload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[schema(example = 900)]
    pub expires_in: i64,
    /// Present on code exchange, absent on refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SanitizedEndUser>,
}

/// Returned by login-local / verify-otp when the pending authorization
/// request resumes and a single-use code is issued.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCodeResponse {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub redirect_uri: String,
}

/// Result of `POST /sdk/verify-otp`. The code fields are present only
/// when the verification resumed a pending authorization request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpResponse {
    #[schema(example = true)]
    pub verified: bool,
    pub user: SanitizedEndUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "If the account exists, a new code has been sent.")]
    pub message: String,
}

/// 403 body for logins blocked on an unverified email. `error` is the
/// stable machine-readable code the SDKs branch on.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerificationRequiredResponse {
    #[schema(example = "EMAIL_NOT_VERIFIED")]
    pub error: String,
    pub error_description: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_request: Option<String>,
}

/// Query parameters the upstream idp sends to `/auth/{provider}/callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Query parameter for `/auth/{provider}` and the local login UI.
#[derive(Debug, Deserialize)]
pub struct SdkRequestQuery {
    pub sdk_request: String,
}
