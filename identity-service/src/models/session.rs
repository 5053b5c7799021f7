//! Session model - refresh-token sessions with rotation.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity. Looked up by `token_hash` (SHA-256 hex of the
/// refresh token); the token value itself is never persisted.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub is_valid: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub rotated_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        project_id: Uuid,
        token_hash: String,
        expiry_days: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            project_id,
            token_hash,
            expiry_utc: Utc::now() + Duration::days(expiry_days),
            is_valid: true,
            ip_address,
            user_agent,
            created_utc: Utc::now(),
            rotated_utc: None,
        }
    }

    /// Valid and unexpired.
    pub fn is_active(&self) -> bool {
        self.is_valid && self.expiry_utc > Utc::now()
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_active() {
        let s = Session::new(Uuid::new_v4(), Uuid::new_v4(), "h".into(), 7, None, None);
        assert!(s.is_active());
        assert!(!s.is_expired());
    }

    #[test]
    fn invalidated_session_is_not_active() {
        let mut s = Session::new(Uuid::new_v4(), Uuid::new_v4(), "h".into(), 7, None, None);
        s.is_valid = false;
        assert!(!s.is_active());
    }
}
