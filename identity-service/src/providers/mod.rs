//! Upstream identity provider adapters.
//!
//! Each adapter turns a provider callback code into a [`FederatedProfile`],
//! the one normalized shape the rest of the engine consumes. Provider
//! quirks (email endpoints, avatar CDN paths) stay behind this boundary.

mod discord;
mod github;
mod google;

pub use discord::DiscordProvider;
pub use github::GithubProvider;
pub use google::GoogleProvider;

use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProvidersConfig;
use crate::models::ProviderKind;

/// Identity facts asserted by an upstream provider, normalized.
#[derive(Debug, Clone)]
pub struct FederatedProfile {
    pub provider: ProviderKind,
    pub provider_user_id: String,
    pub email: String,
    pub username_hint: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Upstream authorization URL the browser is redirected to. `state`
    /// carries our pending request id through the round trip.
    fn authorize_url(&self, callback_uri: &str, state: &str) -> String;

    /// Exchange the callback code and fetch the user's profile.
    async fn fetch_profile(
        &self,
        code: &str,
        callback_uri: &str,
    ) -> Result<FederatedProfile, AppError>;
}

/// The adapters enabled by configuration, keyed by provider kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderSet {
    pub fn from_config(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

        if let Some(google) = &config.google {
            adapters.insert(
                ProviderKind::Google,
                Arc::new(GoogleProvider::new(google.clone(), client.clone())),
            );
        }
        if let Some(github) = &config.github {
            adapters.insert(
                ProviderKind::Github,
                Arc::new(GithubProvider::new(github.clone(), client.clone())),
            );
        }
        if let Some(discord) = &config.discord {
            adapters.insert(
                ProviderKind::Discord,
                Arc::new(DiscordProvider::new(discord.clone(), client)),
            );
        }

        Self { adapters }
    }

    /// Install an adapter directly. Used by embedders and tests that bring
    /// their own [`ProviderAdapter`] instead of configuring one from env.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }
}

/// Shared shape of the provider token endpoints' response.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct UpstreamTokenResponse {
    pub access_token: String,
}

pub(crate) async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<UpstreamTokenResponse, AppError> {
    let response = client
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("provider token call failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        tracing::warn!(status = %status, url = %token_url, "provider rejected code exchange");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "provider rejected the authorization code"
        )));
    }

    response
        .json::<UpstreamTokenResponse>()
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("provider token decode failed: {}", e)))
}
