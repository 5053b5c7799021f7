use async_trait::async_trait;
use serde::Deserialize;
use service_core::error::AppError;

use super::{post_token_form, FederatedProfile, ProviderAdapter};
use crate::config::OAuthClientConfig;
use crate::models::ProviderKind;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

// GitHub's API rejects requests without a User-Agent.
const USER_AGENT: &str = concat!("identity-service/", env!("CARGO_PKG_VERSION"));

pub struct GithubProvider {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl GithubProvider {
    pub fn new(config: OAuthClientConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// The `/user` endpoint omits the email when it is private; fall back
    /// to the primary verified address from `/user/emails`.
    async fn primary_email(&self, access_token: &str) -> Result<Option<GithubEmail>, AppError> {
        let emails: Vec<GithubEmail> = self
            .client
            .get(EMAILS_URL)
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("github emails failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("github emails failed: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("github emails decode failed: {}", e))
            })?;

        Ok(emails
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| emails.iter().find(|e| e.verified))
            .cloned())
    }
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[async_trait]
impl ProviderAdapter for GithubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    fn authorize_url(&self, callback_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope=read%3Auser%20user%3Aemail&state={}",
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
            ],
        )
        .await?;

        let user: GithubUser = self
            .client
            .get(USER_URL)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("github user failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("github user failed: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("github user decode failed: {}", e))
            })?;

        let (email, email_verified) = match user.email {
            Some(email) => (email, true),
            None => match self.primary_email(&token.access_token).await? {
                Some(primary) => (primary.email, primary.verified),
                None => {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "github account has no verified email address"
                    )))
                }
            },
        };

        Ok(FederatedProfile {
            provider: ProviderKind::Github,
            provider_user_id: user.id.to_string(),
            email,
            username_hint: Some(user.login),
            avatar_url: user.avatar_url,
            email_verified,
        })
    }
}
