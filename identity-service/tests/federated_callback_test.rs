//! Federated provider legs end to end, with a scripted provider adapter
//! standing in for the upstream idp.

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::*;
use service_core::error::AppError;
use std::sync::Arc;

use identity_service::models::ProviderKind;
use identity_service::providers::{FederatedProfile, ProviderAdapter, ProviderSet};

/// Upstream google stand-in with a scripted outcome.
struct MockGoogle {
    email: String,
    email_verified: bool,
    reject_code: bool,
}

impl MockGoogle {
    fn verified(email: &str) -> Self {
        Self {
            email: email.to_string(),
            email_verified: true,
            reject_code: false,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockGoogle {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn authorize_url(&self, callback_uri: &str, state: &str) -> String {
        format!(
            "https://accounts.mock.test/authorize?client_id=mock&redirect_uri={}&state={}",
            urlencoding::encode(callback_uri),
            state
        )
    }

    async fn fetch_profile(
        &self,
        code: &str,
        _callback_uri: &str,
    ) -> Result<FederatedProfile, AppError> {
        if self.reject_code {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "provider rejected the authorization code"
            )));
        }
        Ok(FederatedProfile {
            provider: ProviderKind::Google,
            provider_user_id: format!("goog-{}", code),
            email: self.email.clone(),
            username_hint: Some("fed-user".to_string()),
            avatar_url: None,
            email_verified: self.email_verified,
        })
    }
}

async fn app_with(adapter: MockGoogle) -> TestApp {
    let providers = ProviderSet::default().with_adapter(Arc::new(adapter));
    spawn_app_with(test_config(), test_project(), providers).await
}

#[tokio::test]
async fn test_federated_happy_path_issues_an_exchangeable_code() {
    let app = app_with(MockGoogle::verified("fed@example.com")).await;

    // 1. Authorize points the browser at the provider redirect leg.
    let uri = authorize_uri("google", &derive_challenge(VERIFIER), Some("fed-state"));
    let response = app.get(&uri).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let provider_leg = location_header(&response);
    let sdk_request = query_param(&provider_leg, "sdk_request").unwrap();

    // 2. The redirect leg forwards to the upstream authorize URL; our
    // request id rides in the upstream state parameter.
    let response = app.get(&provider_leg).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let upstream = location_header(&response);
    assert!(upstream.starts_with("https://accounts.mock.test/authorize?"));
    assert_eq!(query_param(&upstream, "state").as_deref(), Some(sdk_request.as_str()));
    assert_eq!(
        query_param(&upstream, "redirect_uri").as_deref(),
        Some("http://localhost:8080/auth/google/callback")
    );

    // 3. The callback converts the pending request into our own code and
    // sends the browser to the project's redirect URI.
    let response = app
        .get(&format!(
            "/auth/google/callback?code=upstream-123&state={}",
            sdk_request
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location_header(&response);
    assert!(target.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&target, "state").as_deref(), Some("fed-state"));
    let code = query_param(&target, "code").unwrap();

    // 4. The code exchanges like any other.
    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["user"]["email"], "fed@example.com");
    assert_eq!(body["user"]["provider"], "google");
    assert_eq!(body["user"]["is_verified"], true);

    // 5. The pending request was consumed; replaying the callback can no
    // longer reach a trusted redirect target and answers JSON.
    let response = app
        .get(&format!(
            "/auth/google/callback?code=upstream-123&state={}",
            sdk_request
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_upstream_denial_reports_on_the_redirect_uri() {
    let app = app_with(MockGoogle::verified("deny@example.com")).await;

    let uri = authorize_uri("google", &derive_challenge(VERIFIER), Some("csrf-1"));
    let response = app.get(&uri).await;
    let sdk_request = query_param(&location_header(&response), "sdk_request").unwrap();

    let response = app
        .get(&format!(
            "/auth/google/callback?error=access_denied&error_description=User%20cancelled&state={}",
            sdk_request
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location_header(&response);
    assert!(target.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&target, "error").as_deref(), Some("access_denied"));
    assert_eq!(
        query_param(&target, "error_description").as_deref(),
        Some("User cancelled")
    );
    assert_eq!(query_param(&target, "state").as_deref(), Some("csrf-1"));
}

#[tokio::test]
async fn test_unverified_federated_email_detours_through_otp() {
    let app = app_with(MockGoogle {
        email: "fresh@example.com".to_string(),
        email_verified: false,
        reject_code: false,
    })
    .await;

    // 1. Authorize and come back from the provider with an unverified
    // address: the browser lands on the redirect URI with the gate error
    // and the still-pending request id.
    let uri = authorize_uri("google", &derive_challenge(VERIFIER), Some("st-9"));
    let response = app.get(&uri).await;
    let sdk_request = query_param(&location_header(&response), "sdk_request").unwrap();

    let response = app
        .get(&format!(
            "/auth/google/callback?code=up-1&state={}",
            sdk_request
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location_header(&response);
    assert!(target.starts_with(REDIRECT_URI));
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("EMAIL_NOT_VERIFIED")
    );
    assert_eq!(
        query_param(&target, "sdk_request").as_deref(),
        Some(sdk_request.as_str())
    );
    assert_eq!(query_param(&target, "state").as_deref(), Some("st-9"));

    // 2. A code was mailed; redeeming it resumes the same request.
    let otp = app.mailer.last_code_for("fresh@example.com").unwrap();
    let response = app
        .post_json(
            "/sdk/verify-otp",
            serde_json::json!({
                "publicKey": PUBLIC_KEY,
                "email": "fresh@example.com",
                "otp": otp,
                "sdk_request": sdk_request,
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["verified"], true);
    let code = body["code"].as_str().unwrap().to_string();

    // 3. And that code exchanges.
    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["user"]["email"], "fresh@example.com");
    assert_eq!(body["user"]["is_verified"], true);
}

#[tokio::test]
async fn test_rejected_upstream_code_reports_invalid_grant() {
    let app = app_with(MockGoogle {
        email: "reject@example.com".to_string(),
        email_verified: true,
        reject_code: true,
    })
    .await;

    let uri = authorize_uri("google", &derive_challenge(VERIFIER), None);
    let response = app.get(&uri).await;
    let sdk_request = query_param(&location_header(&response), "sdk_request").unwrap();

    let response = app
        .get(&format!(
            "/auth/google/callback?code=bad&state={}",
            sdk_request
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location_header(&response);
    assert_eq!(query_param(&target, "error").as_deref(), Some("invalid_grant"));
}

#[tokio::test]
async fn test_callback_without_resolvable_request_answers_json() {
    let app = app_with(MockGoogle::verified("x@example.com")).await;

    // Unknown state: no redirect target is trusted.
    let response = app
        .get("/auth/google/callback?code=x&state=unknown-request")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "invalid_grant");

    // Missing state entirely.
    let response = app.get("/auth/google/callback?code=x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_redirect_leg_rejects_bad_providers() {
    // No adapter configured at all.
    let app = spawn_app().await;
    let sdk_request = app.begin_authorize("google").await;

    let response = app
        .get(&format!("/auth/google?sdk_request={}", sdk_request))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "invalid_request");

    // The local provider has no redirect leg.
    let response = app.get("/auth/local?sdk_request=whatever").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown provider names.
    let response = app.get("/auth/myspace?sdk_request=whatever").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
