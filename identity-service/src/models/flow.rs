//! Ephemeral flow state: pending authorization requests and issued codes.
//!
//! Both live only in the flow store (memory or Redis), never in Postgres.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::end_user::SanitizedEndUser;
use crate::utils::random_hex_token;

/// 128 bits of entropy for request ids.
const REQUEST_ID_BYTES: usize = 16;
/// 256 bits for authorization codes; double the id length keeps the two
/// namespaces visually and structurally distinct.
const CODE_BYTES: usize = 32;

/// A pending browser authorization attempt, created at `/sdk/authorize` and
/// converted into an [`AuthCode`] exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub request_id: String,
    pub project_id: Uuid,
    pub public_key: String,
    pub redirect_uri: String,
    pub provider: String,
    pub code_challenge: String,
    pub state: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AuthRequest {
    pub fn new(
        project_id: Uuid,
        public_key: String,
        redirect_uri: String,
        provider: String,
        code_challenge: String,
        state: Option<String>,
    ) -> Self {
        Self {
            request_id: random_hex_token(REQUEST_ID_BYTES),
            project_id,
            public_key,
            redirect_uri,
            provider,
            code_challenge,
            state,
            created_utc: Utc::now(),
        }
    }
}

/// A single-use authorization code: the originating request's fields plus the
/// resolved end user. Consuming it is an atomic get-and-delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub code: String,
    pub request_id: String,
    pub project_id: Uuid,
    pub public_key: String,
    pub redirect_uri: String,
    pub provider: String,
    pub code_challenge: String,
    pub state: Option<String>,
    pub user: SanitizedEndUser,
    pub created_utc: DateTime<Utc>,
}

impl AuthCode {
    pub fn issue(request: AuthRequest, user: SanitizedEndUser) -> Self {
        Self {
            code: random_hex_token(CODE_BYTES),
            request_id: request.request_id,
            project_id: request.project_id,
            public_key: request.public_key,
            redirect_uri: request.redirect_uri,
            provider: request.provider,
            code_challenge: request.code_challenge,
            state: request.state,
            user,
            created_utc: Utc::now(),
        }
    }
}
