use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use service_core::error::AppError;

use crate::dtos::auth::{CallbackQuery, SdkRequestQuery};
use crate::models::{AuthCode, AuthRequest, ProviderKind};
use crate::services::error::FlowError;
use crate::AppState;

/// Redirect the browser to the upstream provider
///
/// The upstream `state` parameter carries our pending request id, which
/// is what the callback uses to find its way back to the flow.
#[utoipa::path(
    get,
    path = "/auth/{provider}",
    params(
        ("provider" = String, Path, description = "Federated provider name"),
        ("sdk_request" = String, Query, description = "Pending authorization request id")
    ),
    responses(
        (status = 302, description = "Redirect to the upstream authorize URL"),
        (status = 400, description = "Unknown provider or expired request", body = ErrorResponse)
    ),
    tag = "Federated"
)]
pub async fn provider_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<SdkRequestQuery>,
) -> Result<Redirect, FlowError> {
    let kind = parse_provider(&provider)?;
    let adapter = state.providers.get(kind).ok_or_else(|| {
        FlowError::InvalidRequest(format!("provider '{}' is not configured", kind))
    })?;

    let request = state.flows.pending_request(&query.sdk_request).await?;
    if request.provider != kind.as_str() {
        return Err(FlowError::InvalidRequest(
            "authorization request was started for a different provider".to_string(),
        ));
    }

    let url = adapter.authorize_url(&callback_uri(&state, kind), &request.request_id);
    Ok(Redirect::to(&url))
}

/// Upstream provider callback
///
/// Once the pending request behind `state` is resolved, the registered
/// redirect URI is a trusted target and every outcome, success or
/// failure, is reported there. Before that point failures answer with
/// JSON.
#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Federated provider name"),
        ("code" = Option<String>, Query, description = "Upstream authorization code"),
        ("state" = Option<String>, Query, description = "Echoed pending request id"),
        ("error" = Option<String>, Query, description = "Upstream error code")
    ),
    responses(
        (status = 302, description = "Redirect to the project's redirect URI with code or error"),
        (status = 400, description = "Callback could not be tied to a pending request", body = ErrorResponse)
    ),
    tag = "Federated"
)]
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match run_callback(&state, &provider, query).await {
        Ok(code) => success_redirect(&code).into_response(),
        Err(CallbackFailure::Api(err)) => err.into_response(),
        Err(CallbackFailure::Browser { request, error }) => {
            error_redirect(&request, &error).into_response()
        }
    }
}

/// How a callback failure reaches the caller.
enum CallbackFailure {
    /// No trusted redirect target is known yet.
    Api(FlowError),
    /// The pending request resolved; report on its redirect URI.
    Browser {
        request: AuthRequest,
        error: RedirectError,
    },
}

struct RedirectError {
    code: &'static str,
    description: String,
    sdk_request: Option<String>,
}

impl From<FlowError> for RedirectError {
    fn from(err: FlowError) -> Self {
        let code = err.error_code();
        let description = err.description();
        let sdk_request = match err {
            FlowError::VerificationRequired { sdk_request, .. } => sdk_request,
            _ => None,
        };
        RedirectError {
            code,
            description,
            sdk_request,
        }
    }
}

async fn run_callback(
    state: &AppState,
    provider: &str,
    query: CallbackQuery,
) -> Result<AuthCode, CallbackFailure> {
    let kind = parse_provider(provider).map_err(CallbackFailure::Api)?;

    let request_id = query.state.as_deref().ok_or_else(|| {
        CallbackFailure::Api(FlowError::InvalidRequest(
            "missing state parameter".to_string(),
        ))
    })?;
    let request = state
        .flows
        .pending_request(request_id)
        .await
        .map_err(CallbackFailure::Api)?;

    if request.provider != kind.as_str() {
        return Err(CallbackFailure::Api(FlowError::InvalidRequest(
            "authorization request was started for a different provider".to_string(),
        )));
    }

    if let Some(error) = query.error {
        tracing::warn!(provider = %kind, upstream_error = %error, "provider denied the authorization");
        let description = query
            .error_description
            .unwrap_or_else(|| format!("provider returned '{}'", error));
        return Err(CallbackFailure::Browser {
            request,
            error: RedirectError {
                code: "access_denied",
                description,
                sdk_request: None,
            },
        });
    }

    let Some(code) = query.code else {
        return Err(CallbackFailure::Browser {
            request,
            error: RedirectError {
                code: "invalid_request",
                description: "provider callback carried no code".to_string(),
                sdk_request: None,
            },
        });
    };

    let Some(adapter) = state.providers.get(kind) else {
        return Err(CallbackFailure::Browser {
            request,
            error: RedirectError {
                code: "invalid_request",
                description: format!("provider '{}' is not configured", kind),
                sdk_request: None,
            },
        });
    };

    let profile = match adapter.fetch_profile(&code, &callback_uri(state, kind)).await {
        Ok(profile) => profile,
        Err(err) => {
            // A rejected upstream code is the caller's problem; anything
            // else is ours.
            let flow_err = match err {
                AppError::Unauthorized(inner) => FlowError::InvalidGrant(inner.to_string()),
                other => FlowError::Server(other),
            };
            if let FlowError::Server(ref inner) = flow_err {
                tracing::error!(provider = %kind, error = ?inner, "provider profile fetch failed");
            }
            return Err(CallbackFailure::Browser {
                request,
                error: flow_err.into(),
            });
        }
    };

    let (auth_code, events) = state
        .flows
        .complete_federated(kind, &request.request_id, &profile)
        .await
        .map_err(|err| CallbackFailure::Browser {
            request: request.clone(),
            error: err.into(),
        })?;
    state.events.dispatch(events);

    Ok(auth_code)
}

fn parse_provider(provider: &str) -> Result<ProviderKind, FlowError> {
    let kind: ProviderKind = provider
        .parse()
        .map_err(|_| FlowError::InvalidRequest(format!("unknown provider '{}'", provider)))?;
    if !kind.is_federated() {
        return Err(FlowError::InvalidRequest(
            "the local provider has no redirect leg".to_string(),
        ));
    }
    Ok(kind)
}

fn callback_uri(state: &AppState, kind: ProviderKind) -> String {
    format!(
        "{}/auth/{}/callback",
        state.config.public_base_url,
        kind.as_str()
    )
}

fn success_redirect(code: &AuthCode) -> Redirect {
    let sep = if code.redirect_uri.contains('?') { '&' } else { '?' };
    let mut target = format!("{}{}code={}", code.redirect_uri, sep, code.code);
    if let Some(state) = &code.state {
        target.push_str("&state=");
        target.push_str(&urlencoding::encode(state));
    }
    Redirect::to(&target)
}

fn error_redirect(request: &AuthRequest, error: &RedirectError) -> Redirect {
    let sep = if request.redirect_uri.contains('?') { '&' } else { '?' };
    let mut target = format!(
        "{}{}error={}&error_description={}",
        request.redirect_uri,
        sep,
        urlencoding::encode(error.code),
        urlencoding::encode(&error.description)
    );
    if let Some(sdk_request) = &error.sdk_request {
        target.push_str("&sdk_request=");
        target.push_str(&urlencoding::encode(sdk_request));
    }
    if let Some(state) = &request.state {
        target.push_str("&state=");
        target.push_str(&urlencoding::encode(state));
    }
    Redirect::to(&target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_request(state: Option<&str>) -> AuthRequest {
        AuthRequest {
            request_id: "req1".to_string(),
            project_id: Uuid::new_v4(),
            public_key: "pk_1".to_string(),
            redirect_uri: "https://app.test/cb".to_string(),
            provider: "google".to_string(),
            code_challenge: "c".repeat(43),
            state: state.map(|s| s.to_string()),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn parse_provider_rejects_local_and_unknown() {
        assert!(parse_provider("google").is_ok());
        assert!(parse_provider("local").is_err());
        assert!(parse_provider("myspace").is_err());
    }

    #[test]
    fn error_redirect_escapes_and_echoes_state() {
        let request = sample_request(Some("csrf token"));
        let error = RedirectError {
            code: "access_denied",
            description: "user said no".to_string(),
            sdk_request: None,
        };
        let redirect = error_redirect(&request, &error);
        let response = redirect.into_response();
        let location = response
            .headers()
            .get(axum::http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("https://app.test/cb?error=access_denied"));
        assert!(location.contains("error_description=user%20said%20no"));
        assert!(location.contains("state=csrf%20token"));
    }

    #[test]
    fn verification_failure_keeps_the_flow_resumable() {
        let error: RedirectError = FlowError::VerificationRequired {
            email: "u@x.com".to_string(),
            sdk_request: Some("req1".to_string()),
        }
        .into();
        assert_eq!(error.code, "EMAIL_NOT_VERIFIED");
        assert_eq!(error.sdk_request.as_deref(), Some("req1"));
    }
}
