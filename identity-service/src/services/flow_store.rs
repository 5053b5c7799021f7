use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{aio::ConnectionManager, Client};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{AuthCode, AuthRequest};

const REQUEST_KEY_PREFIX: &str = "areq:";
const CODE_KEY_PREFIX: &str = "acode:";

/// Ephemeral store for pending authorization requests and issued codes.
///
/// Both object kinds are time-bounded and the code is single-use: `take_*`
/// must remove the entry atomically so that out of any number of concurrent
/// callers exactly one receives it. Entries never outlive their TTL from a
/// caller's point of view even if removal is deferred.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn put_request(&self, request: &AuthRequest) -> Result<(), AppError>;

    /// Non-consuming read, used to validate a login attempt without
    /// burning the pending request.
    async fn get_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError>;

    /// Atomic get-and-delete of a pending request.
    async fn take_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError>;

    async fn delete_request(&self, request_id: &str) -> Result<(), AppError>;

    async fn put_code(&self, code: &AuthCode) -> Result<(), AppError>;

    /// Atomic get-and-delete of an issued code. A second call with the
    /// same code observes `None`.
    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>, AppError>;

    /// Drop expired entries. Returns how many were removed; backends with
    /// native expiry may return 0.
    async fn sweep(&self) -> Result<u64, AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct Expiring<T> {
    value: T,
    expires_utc: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_utc
    }
}

#[derive(Default)]
struct FlowState {
    requests: HashMap<String, Expiring<AuthRequest>>,
    codes: HashMap<String, Expiring<AuthCode>>,
}

/// Single-node in-memory flow store. One mutex guards both maps, which
/// makes every `take_*` trivially atomic. Expiry is checked on read and
/// bulk-collected by `sweep`.
pub struct MemoryFlowStore {
    state: Mutex<FlowState>,
    request_ttl_seconds: i64,
    code_ttl_seconds: i64,
}

impl MemoryFlowStore {
    pub fn new(request_ttl_seconds: i64, code_ttl_seconds: i64) -> Self {
        Self {
            state: Mutex::new(FlowState::default()),
            request_ttl_seconds,
            code_ttl_seconds,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FlowState>, AppError> {
        self.state
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("flow store poisoned: {}", e)))
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn put_request(&self, request: &AuthRequest) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.requests.insert(
            request.request_id.clone(),
            Expiring {
                value: request.clone(),
                expires_utc: Utc::now() + Duration::seconds(self.request_ttl_seconds),
            },
        );
        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError> {
        let mut state = self.lock()?;
        match state.requests.get(request_id) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.requests.remove(request_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError> {
        let mut state = self.lock()?;
        match state.requests.remove(request_id) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn delete_request(&self, request_id: &str) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.requests.remove(request_id);
        Ok(())
    }

    async fn put_code(&self, code: &AuthCode) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.codes.insert(
            code.code.clone(),
            Expiring {
                value: code.clone(),
                expires_utc: Utc::now() + Duration::seconds(self.code_ttl_seconds),
            },
        );
        Ok(())
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>, AppError> {
        let mut state = self.lock()?;
        match state.codes.remove(code) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        let before = state.requests.len() + state.codes.len();
        state.requests.retain(|_, entry| !entry.is_expired());
        state.codes.retain(|_, entry| !entry.is_expired());
        let after = state.requests.len() + state.codes.len();
        Ok((before - after) as u64)
    }
}

/// Redis-backed flow store for multi-node deployments. TTLs ride on the
/// keys themselves and `take_*` maps to GETDEL, so atomicity and expiry
/// are Redis's problem.
#[derive(Clone)]
pub struct RedisFlowStore {
    manager: ConnectionManager,
    request_ttl_seconds: i64,
    code_ttl_seconds: i64,
}

impl RedisFlowStore {
    pub async fn connect(
        url: &str,
        request_ttl_seconds: i64,
        code_ttl_seconds: i64,
    ) -> Result<Self, AppError> {
        tracing::info!("Connecting flow store to Redis");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AppError::RedisError(e)
        })?;
        tracing::info!("Flow store connected to Redis");
        Ok(Self {
            manager,
            request_ttl_seconds,
            code_ttl_seconds,
        })
    }

    async fn put_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("flow encode failed: {}", e)))?;
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, AppError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Self::decode(raw)
    }

    async fn take_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, AppError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Self::decode(raw)
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, AppError> {
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AppError::InternalError(anyhow::anyhow!("flow decode failed: {}", e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FlowStore for RedisFlowStore {
    async fn put_request(&self, request: &AuthRequest) -> Result<(), AppError> {
        let key = format!("{}{}", REQUEST_KEY_PREFIX, request.request_id);
        self.put_json(&key, request, self.request_ttl_seconds).await
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError> {
        let key = format!("{}{}", REQUEST_KEY_PREFIX, request_id);
        self.get_json(&key).await
    }

    async fn take_request(&self, request_id: &str) -> Result<Option<AuthRequest>, AppError> {
        let key = format!("{}{}", REQUEST_KEY_PREFIX, request_id);
        self.take_json(&key).await
    }

    async fn delete_request(&self, request_id: &str) -> Result<(), AppError> {
        let key = format!("{}{}", REQUEST_KEY_PREFIX, request_id);
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_code(&self, code: &AuthCode) -> Result<(), AppError> {
        let key = format!("{}{}", CODE_KEY_PREFIX, code.code);
        self.put_json(&key, code, self.code_ttl_seconds).await
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthCode>, AppError> {
        let key = format!("{}{}", CODE_KEY_PREFIX, code);
        self.take_json(&key).await
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        // Redis expires keys natively.
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::RedisError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndUser;
    use std::sync::Arc;
    use uuid::Uuid;

    fn request() -> AuthRequest {
        AuthRequest::new(
            Uuid::new_v4(),
            "pk_test".into(),
            "https://a.test/cb".into(),
            "local".into(),
            "challenge".into(),
            None,
        )
    }

    fn issued_code() -> AuthCode {
        let req = request();
        let user = EndUser::new_local(
            req.project_id,
            "u@x.com".into(),
            "u".into(),
            "hash".into(),
        );
        AuthCode::issue(req, user.sanitized())
    }

    #[tokio::test]
    async fn take_code_consumes_exactly_once() {
        let store = MemoryFlowStore::new(600, 300);
        let code = issued_code();
        store.put_code(&code).await.unwrap();

        assert!(store.take_code(&code.code).await.unwrap().is_some());
        assert!(store.take_code(&code.code).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_take_code_has_a_single_winner() {
        let store = Arc::new(MemoryFlowStore::new(600, 300));
        let code = issued_code();
        store.put_code(&code).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let value = code.code.clone();
            handles.push(tokio::spawn(
                async move { store.take_code(&value).await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_request_reads_as_absent() {
        let store = MemoryFlowStore::new(0, 300);
        let req = request();
        store.put_request(&req).await.unwrap();

        assert!(store.get_request(&req.request_id).await.unwrap().is_none());
        assert!(store.take_request(&req.request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_request_does_not_consume() {
        let store = MemoryFlowStore::new(600, 300);
        let req = request();
        store.put_request(&req).await.unwrap();

        assert!(store.get_request(&req.request_id).await.unwrap().is_some());
        assert!(store.get_request(&req.request_id).await.unwrap().is_some());
        assert!(store.take_request(&req.request_id).await.unwrap().is_some());
        assert!(store.get_request(&req.request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_reports_removed_entries() {
        let store = MemoryFlowStore::new(0, 0);
        store.put_request(&request()).await.unwrap();
        store.put_code(&issued_code()).await.unwrap();

        let removed = store.sweep().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.sweep().await.unwrap(), 0);
    }
}
