//! Per-project Origin allowlisting at the token endpoint.

mod common;

use axum::http::StatusCode;
use common::*;
use identity_service::providers::ProviderSet;

#[tokio::test]
async fn test_allowlisted_origin_passes_and_others_are_denied() {
    let mut project = test_project();
    project.allowed_origins = vec!["https://app.example.com".to_string()];
    let app = spawn_app_with(test_config(), project, ProviderSet::default()).await;

    // 1. A browser on a foreign origin is refused; the code is burned by
    // the attempt.
    let code = app.issue_code("cors@example.com", "Passw0rd!").await;
    let response = app
        .post_json_with_headers(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
            &[("Origin", "https://evil.example.com")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["error"], "access_denied");

    // 2. The allowlisted origin exchanges a fresh code fine.
    let sdk_request = app.begin_authorize("local").await;
    let response = app
        .post_json(
            "/sdk/login-local",
            serde_json::json!({
                "publicKey": PUBLIC_KEY,
                "sdk_request": sdk_request,
                "email": "cors@example.com",
                "password": "Passw0rd!",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = read_json(response).await["code"].as_str().unwrap().to_string();

    let response = app
        .post_json_with_headers(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
            &[("Origin", "https://app.example.com")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_absent_origin_passes() {
    let mut project = test_project();
    project.allowed_origins = vec!["https://app.example.com".to_string()];
    let app = spawn_app_with(test_config(), project, ProviderSet::default()).await;

    // Non-browser callers send no Origin header and are never origin-gated.
    let code = app.issue_code("cli@example.com", "Passw0rd!").await;
    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_allowlist_follows_the_default_deny_switch() {
    // Default posture: an empty allowlist does not gate.
    let app = spawn_app().await;
    let code = app.issue_code("open@example.com", "Passw0rd!").await;
    let response = app
        .post_json_with_headers(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
            &[("Origin", "https://anywhere.example")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Deployments can opt into deny-by-default.
    let mut config = test_config();
    config.security.origin_default_deny = true;
    let app = spawn_app_with(config, test_project(), ProviderSet::default()).await;
    let code = app.issue_code("closed@example.com", "Passw0rd!").await;
    let response = app
        .post_json_with_headers(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
            &[("Origin", "https://anywhere.example")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["error"], "access_denied");
}

#[tokio::test]
async fn test_refresh_is_origin_gated_too() {
    let mut project = test_project();
    project.allowed_origins = vec!["https://app.example.com".to_string()];
    let app = spawn_app_with(test_config(), project, ProviderSet::default()).await;

    let code = app.issue_code("refresh-cors@example.com", "Passw0rd!").await;
    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refresh_token = read_json(response).await["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .post_json_with_headers(
            "/sdk/refresh",
            serde_json::json!({"refreshToken": refresh_token}),
            &[("Origin", "https://evil.example.com")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["error"], "access_denied");

    // The denied attempt did not rotate the session.
    let response = app
        .post_json_with_headers(
            "/sdk/refresh",
            serde_json::json!({"refreshToken": refresh_token}),
            &[("Origin", "https://app.example.com")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
