//! The event side-channel: flow operations emit events after their
//! responses commit, and sinks observe them in order.

mod common;

use axum::http::StatusCode;
use common::*;
use identity_service::services::EventKind;
use std::time::Duration;

/// Delivery is fire-and-forget on a background task; poll briefly.
async fn wait_for_events(app: &TestApp, count: usize) -> Vec<EventKind> {
    for _ in 0..100 {
        if app.events.kinds().len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.events.kinds()
}

#[tokio::test]
async fn test_full_flow_leaves_an_event_trail() {
    let app = spawn_app().await;

    let code = app.issue_code("trail@example.com", "Passw0rd!").await;
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
        .post_json(
            "/sdk/refresh",
            serde_json::json!({"refreshToken": refresh_token}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let kinds = wait_for_events(&app, 4).await;
    assert!(kinds.contains(&EventKind::AuthRequestCreated));
    assert!(kinds.contains(&EventKind::AuthCodeIssued));
    assert!(kinds.contains(&EventKind::TokenExchanged));
    assert!(kinds.contains(&EventKind::TokenRefreshed));
}

#[tokio::test]
async fn test_events_carry_the_project_and_no_credentials() {
    let app = spawn_app().await;

    let code = app.issue_code("payload@example.com", "Passw0rd!").await;
    let response = app
        .post_json(
            "/sdk/token",
            serde_json::json!({"code": code, "codeVerifier": VERIFIER}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    wait_for_events(&app, 3).await;
    let events = app.events.events.lock().unwrap().clone();
    assert!(!events.is_empty());

    for event in &events {
        assert_eq!(event.project_id, app.project.project_id);
        let payload = serde_json::to_string(&event.payload).unwrap();
        assert!(!payload.contains("Passw0rd!"));
        assert!(!payload.to_lowercase().contains("password"));
    }

    let exchanged = events
        .iter()
        .find(|e| e.kind == EventKind::TokenExchanged)
        .expect("token exchange should have been recorded");
    assert_eq!(exchanged.payload["email"], "payload@example.com");
    assert!(exchanged.payload["user_id"].is_string());
}
