//! Health, metrics, OpenAPI exposure and the ambient response headers.

mod common;

use axum::http::StatusCode;
use common::*;
use identity_service::config::{Environment, SwaggerMode};
use identity_service::providers::ProviderSet;

#[tokio::test]
async fn test_health_check_returns_healthy() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app.get("/health").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "identity-service");
    assert_eq!(body["checks"]["registry"], "up");
    assert_eq!(body["checks"]["flow_store"], "up");
}

#[tokio::test]
async fn test_metrics_endpoint_responds() {
    let app = spawn_app().await;

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_lists_the_sdk_surface() {
    let app = spawn_app().await;

    let response = app.get("/.well-known/openapi.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    for path in [
        "/sdk/authorize",
        "/sdk/token",
        "/sdk/refresh",
        "/sdk/logout",
        "/sdk/register",
        "/sdk/login-local",
        "/sdk/verify-otp",
        "/sdk/resend-verification",
        "/auth/{provider}",
        "/auth/{provider}/callback",
        "/health",
    ] {
        assert!(
            body["paths"].get(path).is_some(),
            "missing {} in the OpenAPI document",
            path
        );
    }
}

#[tokio::test]
async fn test_disabled_swagger_keeps_openapi_json_only() {
    let mut config = test_config();
    config.environment = Environment::Prod;
    config.swagger.enabled = SwaggerMode::Disabled;
    let app = spawn_app_with(config, test_project(), ProviderSet::default()).await;

    let response = app.get("/docs").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/.well-known/openapi.json").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_responses_are_never_cacheable() {
    let app = spawn_app().await;

    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": "x", "codeVerifier": VERIFIER}),
        )
        .await;

    // Even error responses on the token surface carry no-store.
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["pragma"], "no-cache");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
async fn test_responses_carry_a_request_id() {
    let app = spawn_app().await;

    let response = app.get("/health").await;
    assert!(response.headers().contains_key("x-request-id"));
}
