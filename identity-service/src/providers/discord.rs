use async_trait::async_trait;
use serde::Deserialize;
use service_core::error::AppError;

use super::{post_token_form, FederatedProfile, ProviderAdapter};
use crate::config::OAuthClientConfig;
use crate::models::ProviderKind;

const AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const USER_URL: &str = "https://discord.com/api/users/@me";
const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";

pub struct DiscordProvider {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl DiscordProvider {
    pub fn new(config: OAuthClientConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    email: Option<String>,
    #[serde(default)]
    verified: bool,
    avatar: Option<String>,
}

#[async_trait]
impl ProviderAdapter for DiscordProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Discord
    }

    fn authorize_url(&self, callback_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=identify%20email&state={}",
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

        let user: DiscordUser = self
            .client
            .get(USER_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("discord user failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("discord user failed: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("discord user decode failed: {}", e))
            })?;

        let email = user.email.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("discord account has no email address"))
        })?;

        let avatar_url = user
            .avatar
            .map(|hash| format!("{}/{}/{}.png", AVATAR_CDN, user.id, hash));

        Ok(FederatedProfile {
            provider: ProviderKind::Discord,
            provider_user_id: user.id,
            email,
            username_hint: Some(user.username),
            avatar_url,
            email_verified: user.verified,
        })
    }
}
