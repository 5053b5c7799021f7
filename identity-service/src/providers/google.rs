use async_trait::async_trait;
use serde::Deserialize;
use service_core::error::AppError;

use super::{post_token_form, FederatedProfile, ProviderAdapter};
use crate::config::OAuthClientConfig;
use crate::models::ProviderKind;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub struct GoogleProvider {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: OAuthClientConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn authorize_url(&self, callback_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}",
            AUTHORIZE_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(callback_uri),
            urlencoding::encode(state),
        )
    }

    async fn fetch_profile(
        &self,
        code: &str,
        callback_uri: &str,
    ) -> Result<FederatedProfile, AppError> {
        let token = post_token_form(
            &self.client,
            TOKEN_URL,
            &[
                ("code", code),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("redirect_uri", callback_uri),
                ("grant_type", "authorization_code"),
            ],
        )
        .await?;

        let info: GoogleUserInfo = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("google userinfo failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("google userinfo failed: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("google userinfo decode failed: {}", e))
            })?;

        Ok(FederatedProfile {
            provider: ProviderKind::Google,
            provider_user_id: info.id,
            email: info.email,
            username_hint: info.name,
            avatar_url: info.picture,
            email_verified: info.verified_email,
        })
    }
}
