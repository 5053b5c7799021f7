use axum::{
    extract::{Query, State},
    response::Redirect,
};
use validator::Validate;

use crate::dtos::auth::AuthorizeQuery;
use crate::models::ProviderKind;
use crate::services::error::FlowError;
use crate::services::flows::AuthorizeParams;
use crate::AppState;

/// Start an authorization attempt
///
/// Validates the client, redirect URI, provider and PKCE challenge,
/// stores the pending request and sends the browser to the provider
/// login. Failures answer with JSON: the redirect URI is not a trusted
/// target until it has been validated.
#[utoipa::path(
    get,
    path = "/sdk/authorize",
    params(AuthorizeQuery),
    responses(
        (status = 302, description = "Redirect to the provider login carrying sdk_request"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unknown public key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authorization"
)]
pub async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, FlowError> {
    query
        .validate()
        .map_err(|e| FlowError::InvalidRequest(e.to_string()))?;

    let params = AuthorizeParams {
        public_key: query.public_key,
        redirect_uri: query.redirect_uri,
        provider: query.provider,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
        state: query.state,
    };
    let (request, events) = state.flows.begin_authorize(params).await?;
    state.events.dispatch(events);

    // The browser carries nothing across this hop but the opaque
    // request id.
    let target = if request.provider == ProviderKind::Local.as_str() {
        let login_url = &state.config.local_login_url;
        let sep = if login_url.contains('?') { '&' } else { '?' };
        format!("{}{}sdk_request={}", login_url, sep, request.request_id)
    } else {
        format!(
            "/auth/{}?sdk_request={}",
            request.provider, request.request_id
        )
    };

    Ok(Redirect::to(&target))
}
