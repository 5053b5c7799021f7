pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OAuth-style error object. `error` carries the short code
/// (`invalid_request`, `invalid_grant`, ...), `error_description` the detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "invalid_grant")]
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "authorization code is expired or already used")]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: Some(description.into()),
        }
    }
}
