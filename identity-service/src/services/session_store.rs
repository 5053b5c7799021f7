use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::Session;

/// Persistence surface for refresh sessions.
///
/// Sessions are keyed by the SHA-256 hex of the refresh token. Rotation
/// swaps the key in one conditional update so the old token and the new
/// token are never both redeemable.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), AppError>;

    /// Lookup by token hash. Returns the row regardless of validity;
    /// callers check `is_active`.
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError>;

    /// Atomically re-key an active session to a new token hash and slide
    /// its expiry. Returns `None` when no active row matched the old
    /// hash, which means the token was already rotated or invalidated.
    async fn rotate(
        &self,
        old_token_hash: &str,
        new_token_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError>;

    /// Mark the session invalid. Returns whether a row was affected.
    async fn invalidate(&self, token_hash: &str) -> Result<bool, AppError>;

    /// Invalidate every session of a user, e.g. after a password change.
    async fn invalidate_user_sessions(&self, user_id: Uuid) -> Result<u64, AppError>;
}

/// In-memory session store for tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, AppError> {
        self.sessions
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("session store poisoned: {}", e)))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<(), AppError> {
        let mut sessions = self.lock()?;
        sessions.insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError> {
        let sessions = self.lock()?;
        Ok(sessions.get(token_hash).cloned())
    }

    async fn rotate(
        &self,
        old_token_hash: &str,
        new_token_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let mut sessions = self.lock()?;
        match sessions.get(old_token_hash) {
            Some(existing) if existing.is_active() => {
                let mut rotated = existing.clone();
                sessions.remove(old_token_hash);
                rotated.token_hash = new_token_hash.to_string();
                rotated.expiry_utc = new_expiry;
                rotated.rotated_utc = Some(Utc::now());
                sessions.insert(new_token_hash.to_string(), rotated.clone());
                Ok(Some(rotated))
            }
            _ => Ok(None),
        }
    }

    async fn invalidate(&self, token_hash: &str) -> Result<bool, AppError> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(token_hash) {
            Some(session) if session.is_valid => {
                session.is_valid = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_user_sessions(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut sessions = self.lock()?;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_valid {
                session.is_valid = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(token_hash: &str) -> Session {
        Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            token_hash.to_string(),
            7,
            Some("10.0.0.1".into()),
            Some("test-agent".into()),
        )
    }

    #[tokio::test]
    async fn rotation_invalidates_the_old_hash() {
        let store = MemorySessionStore::new();
        store.insert(&session("old-hash")).await.unwrap();

        let rotated = store
            .rotate("old-hash", "new-hash", Utc::now() + Duration::days(7))
            .await
            .unwrap();
        assert!(rotated.is_some());

        assert!(store
            .find_by_token_hash("old-hash")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_token_hash("new-hash")
            .await
            .unwrap()
            .is_some());

        // The replay of the old hash rotates nothing.
        let replay = store
            .rotate("old-hash", "other-hash", Utc::now() + Duration::days(7))
            .await
            .unwrap();
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn rotate_refuses_invalidated_sessions() {
        let store = MemorySessionStore::new();
        store.insert(&session("h1")).await.unwrap();
        assert!(store.invalidate("h1").await.unwrap());

        let rotated = store
            .rotate("h1", "h2", Utc::now() + Duration::days(7))
            .await
            .unwrap();
        assert!(rotated.is_none());
    }

    #[tokio::test]
    async fn rotate_refuses_expired_sessions() {
        let store = MemorySessionStore::new();
        let mut expired = session("h1");
        expired.expiry_utc = Utc::now() - Duration::minutes(1);
        store.insert(&expired).await.unwrap();

        let rotated = store
            .rotate("h1", "h2", Utc::now() + Duration::days(7))
            .await
            .unwrap();
        assert!(rotated.is_none());
    }

    #[tokio::test]
    async fn invalidate_user_sessions_sweeps_all() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        for i in 0..3 {
            let mut s = session(&format!("h{}", i));
            s.user_id = user_id;
            store.insert(&s).await.unwrap();
        }
        store.insert(&session("other")).await.unwrap();

        let count = store.invalidate_user_sessions(user_id).await.unwrap();
        assert_eq!(count, 3);
        let untouched = store.find_by_token_hash("other").await.unwrap();
        assert!(untouched.map(|s| s.is_valid).unwrap_or(false));
    }
}
