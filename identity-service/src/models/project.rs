//! Project model - tenant applications registered with the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Login providers a project may enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Google,
    Github,
    Discord,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Google => "google",
            ProviderKind::Github => "github",
            ProviderKind::Discord => "discord",
        }
    }

    pub fn is_federated(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "google" => Ok(ProviderKind::Google),
            "github" => Ok(ProviderKind::Github),
            "discord" => Ok(ProviderKind::Discord),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project entity. Owned by the developer dashboard; read-only here.
///
/// `private_key` is a server-side secret and must never appear in any
/// response or event payload.
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub project_id: Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub redirect_uris: Vec<String>,
    pub enabled_providers: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub webhook_urls: Vec<String>,
    pub verification_template: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Project {
    /// Exact string membership, no normalization.
    pub fn redirect_uri_registered(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn provider_enabled(&self, provider: ProviderKind) -> bool {
        self.enabled_providers.iter().any(|p| p == provider.as_str())
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}
