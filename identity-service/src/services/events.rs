use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::observability::inject_trace_context;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::services::registry::ProjectRegistry;

/// What happened inside the authorization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "AUTH_REQUEST")]
    AuthRequestCreated,
    #[serde(rename = "AUTH_CODE_ISSUED")]
    AuthCodeIssued,
    #[serde(rename = "TOKEN_EXCHANGED")]
    TokenExchanged,
    #[serde(rename = "TOKEN_REFRESHED")]
    TokenRefreshed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AuthRequestCreated => "AUTH_REQUEST",
            EventKind::AuthCodeIssued => "AUTH_CODE_ISSUED",
            EventKind::TokenExchanged => "TOKEN_EXCHANGED",
            EventKind::TokenRefreshed => "TOKEN_REFRESHED",
        }
    }
}

/// A fact about a completed flow step. The engine returns these as plain
/// values once an operation's persistent effects are committed; callers
/// hand them to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub project_id: Uuid,
    pub occurred_utc: DateTime<Utc>,
    /// Kind-specific fields. Never contains credential material.
    pub payload: serde_json::Value,
}

impl AuthEvent {
    pub fn new(kind: EventKind, project_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            project_id,
            occurred_utc: Utc::now(),
            payload,
        }
    }
}

/// A delivery target for auth events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &AuthEvent) -> Result<(), AppError>;

    fn name(&self) -> &'static str;
}

/// Fans events out to every sink on a background task. Delivery is
/// best-effort: failures and timeouts are logged and swallowed, never
/// surfaced to the flow that produced the event.
#[derive(Clone)]
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
    delivery_timeout: Duration,
}

impl EventDispatcher {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>, delivery_timeout: Duration) -> Self {
        Self {
            sinks,
            delivery_timeout,
        }
    }

    /// Dispatcher with no sinks, for tests that don't observe events.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    pub fn dispatch(&self, events: Vec<AuthEvent>) {
        for event in &events {
            crate::services::metrics::observe_flow_event(event.kind.as_str());
        }

        if events.is_empty() || self.sinks.is_empty() {
            return;
        }

        let sinks = self.sinks.clone();
        let timeout = self.delivery_timeout;

        tokio::spawn(async move {
            for event in events {
                for sink in &sinks {
                    let result = tokio::time::timeout(timeout, sink.deliver(&event)).await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(
                                sink = sink.name(),
                                kind = event.kind.as_str(),
                                error = ?e,
                                "event delivery failed"
                            );
                        }
                        Err(_) => {
                            tracing::warn!(
                                sink = sink.name(),
                                kind = event.kind.as_str(),
                                "event delivery timed out"
                            );
                        }
                    }
                }
            }
        });
    }
}

/// Broadcasts every event on an in-process channel. Used by operators
/// tailing the engine and by tests.
pub struct ChannelSink {
    sender: tokio::sync::broadcast::Sender<AuthEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, event: &AuthEvent) -> Result<(), AppError> {
        // A send with no live receivers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Body POSTed to a project's webhook URLs.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    event_id: Uuid,
    project_id: Uuid,
    occurred_utc: DateTime<Utc>,
    data: &'a serde_json::Value,
}

/// Delivers developer-facing events to the owning project's webhook
/// URLs. Only a subset of kinds is wired out; internal flow events stay
/// internal.
pub struct WebhookSink {
    client: reqwest::Client,
    registry: Arc<dyn ProjectRegistry>,
}

impl WebhookSink {
    pub fn new(timeout: Duration, registry: Arc<dyn ProjectRegistry>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(Self { client, registry })
    }

    /// Developer-facing name for a kind, or `None` when webhooks skip it.
    fn wire_event(kind: EventKind) -> Option<&'static str> {
        match kind {
            EventKind::TokenExchanged => Some("user.login"),
            EventKind::AuthRequestCreated
            | EventKind::AuthCodeIssued
            | EventKind::TokenRefreshed => None,
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn deliver(&self, event: &AuthEvent) -> Result<(), AppError> {
        let Some(wire_name) = Self::wire_event(event.kind) else {
            return Ok(());
        };

        let Some(project) = self.registry.resolve_by_id(event.project_id).await? else {
            return Ok(());
        };
        if project.webhook_urls.is_empty() {
            return Ok(());
        }

        let payload = WebhookPayload {
            event: wire_name,
            event_id: event.event_id,
            project_id: event.project_id,
            occurred_utc: event.occurred_utc,
            data: &event.payload,
        };

        let mut headers = reqwest::header::HeaderMap::new();
        inject_trace_context(&mut headers);

        for url in &project.webhook_urls {
            let response = self
                .client
                .post(url)
                .headers(headers.clone())
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %url, event = wire_name, "webhook delivered");
                }
                Ok(resp) => {
                    tracing::warn!(url = %url, status = %resp.status(), event = wire_name, "webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, event = wire_name, "webhook delivery failed");
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Test sink that records everything it sees.
#[derive(Default)]
pub struct RecordingSink {
    pub events: std::sync::Mutex<Vec<AuthEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .map(|e| e.iter().map(|ev| ev.kind).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, event: &AuthEvent) -> Result<(), AppError> {
        self.events
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("recording sink poisoned: {}", e)))?
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_to_wire_names() {
        let json = serde_json::to_string(&EventKind::TokenExchanged).unwrap();
        assert_eq!(json, "\"TOKEN_EXCHANGED\"");
        let back: EventKind = serde_json::from_str("\"AUTH_CODE_ISSUED\"").unwrap();
        assert_eq!(back, EventKind::AuthCodeIssued);
    }

    #[test]
    fn webhook_skips_internal_kinds() {
        assert_eq!(
            WebhookSink::wire_event(EventKind::TokenExchanged),
            Some("user.login")
        );
        assert!(WebhookSink::wire_event(EventKind::AuthRequestCreated).is_none());
        assert!(WebhookSink::wire_event(EventKind::AuthCodeIssued).is_none());
        assert!(WebhookSink::wire_event(EventKind::TokenRefreshed).is_none());
    }

    #[tokio::test]
    async fn dispatch_fans_out_in_order() {
        let recording = Arc::new(RecordingSink::new());
        let dispatcher = EventDispatcher::new(
            vec![recording.clone() as Arc<dyn EventSink>],
            Duration::from_secs(1),
        );
        let project_id = Uuid::new_v4();

        let events = vec![
            AuthEvent::new(
                EventKind::AuthRequestCreated,
                project_id,
                serde_json::json!({}),
            ),
            AuthEvent::new(EventKind::TokenExchanged, project_id, serde_json::json!({})),
        ];
        dispatcher.dispatch(events);

        // Delivery is async; poll briefly.
        for _ in 0..50 {
            if recording.kinds().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            recording.kinds(),
            vec![EventKind::AuthRequestCreated, EventKind::TokenExchanged]
        );
    }

    #[tokio::test]
    async fn channel_sink_broadcasts() {
        let sink = ChannelSink::new(16);
        let mut rx = sink.subscribe();

        let event = AuthEvent::new(
            EventKind::TokenRefreshed,
            Uuid::new_v4(),
            serde_json::json!({"sid": "abc"}),
        );
        sink.deliver(&event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::TokenRefreshed);
        assert_eq!(received.event_id, event.event_id);
    }

    #[tokio::test]
    async fn sink_failure_does_not_reach_the_caller() {
        struct FailingSink;

        #[async_trait]
        impl EventSink for FailingSink {
            async fn deliver(&self, _: &AuthEvent) -> Result<(), AppError> {
                Err(AppError::ServiceUnavailable)
            }
            fn name(&self) -> &'static str {
                "failing"
            }
        }

        let dispatcher =
            EventDispatcher::new(vec![Arc::new(FailingSink)], Duration::from_millis(100));
        dispatcher.dispatch(vec![AuthEvent::new(
            EventKind::TokenExchanged,
            Uuid::new_v4(),
            serde_json::json!({}),
        )]);
        // Nothing to assert beyond not panicking; give the task a tick.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
