//! OTP code model - email-ownership verification codes.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// OTP entity, keyed by (project, email). Only the SHA-256 hex digest of the
/// delivered digits is stored.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub otp_id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    pub code_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub created_utc: DateTime<Utc>,
}

impl OtpCode {
    pub fn new(project_id: Uuid, email: String, code_hash: String, expiry_seconds: i64) -> Self {
        Self {
            otp_id: Uuid::new_v4(),
            project_id,
            email,
            code_hash,
            expiry_utc: Utc::now() + Duration::seconds(expiry_seconds),
            consumed_utc: None,
            attempt_count: 0,
            created_utc: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn attempts_exhausted(&self, max_attempts: i32) -> bool {
        self.attempt_count >= max_attempts
    }

    /// Usable for one more verification attempt.
    pub fn is_active(&self, max_attempts: i32) -> bool {
        !self.is_expired() && !self.is_consumed() && !self.attempts_exhausted(max_attempts)
    }
}
