//! End-user model - project-scoped accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::project::ProviderKind;

/// End-user entity (project-scoped). The same email can hold independent
/// accounts under different projects.
#[derive(Debug, Clone, FromRow)]
pub struct EndUser {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: Option<String>,
    pub provider: String,
    pub provider_user_id: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl EndUser {
    /// Create a local (email/password) account, unverified until OTP success.
    pub fn new_local(project_id: Uuid, email: String, username: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            project_id,
            email,
            username,
            password_hash: Some(password_hash),
            provider: ProviderKind::Local.as_str().to_string(),
            provider_user_id: None,
            avatar_url: None,
            is_verified: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Create an account from a federated profile. No password is stored.
    pub fn new_federated(
        project_id: Uuid,
        email: String,
        username: String,
        provider: ProviderKind,
        provider_user_id: Option<String>,
        avatar_url: Option<String>,
        is_verified: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            project_id,
            email,
            username,
            password_hash: None,
            provider: provider.as_str().to_string(),
            provider_user_id,
            avatar_url,
            is_verified,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.provider.parse().ok()
    }

    /// Strip credential material for responses, codes, and event payloads.
    pub fn sanitized(&self) -> SanitizedEndUser {
        SanitizedEndUser {
            user_id: self.user_id,
            project_id: self.project_id,
            email: self.email.clone(),
            username: self.username.clone(),
            provider: self.provider.clone(),
            avatar_url: self.avatar_url.clone(),
            is_verified: self.is_verified,
            created_utc: self.created_utc,
        }
    }
}

/// End user without credential fields. Safe to serialize outward.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SanitizedEndUser {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    pub username: String,
    pub provider: String,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub created_utc: DateTime<Utc>,
}
