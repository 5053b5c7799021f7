use rand::Rng;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{EndUser, Project};
use crate::providers::FederatedProfile;
use crate::services::credentials::CredentialStore;
use crate::services::error::FlowError;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

const USERNAME_MAX_LEN: usize = 24;
const USERNAME_SUFFIX_ATTEMPTS: usize = 5;

/// Account resolution: local registration and login, and find-or-create
/// for federated profiles.
#[derive(Clone)]
pub struct IdentityService {
    credentials: Arc<dyn CredentialStore>,
}

impl IdentityService {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    /// Create a local account. The account starts unverified and cannot
    /// complete a login until the email is confirmed.
    pub async fn register_local(
        &self,
        project: &Project,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Result<EndUser, FlowError> {
        let email = email.trim().to_lowercase();

        let username = match username {
            Some(name) => {
                if self
                    .credentials
                    .username_taken(project.project_id, name)
                    .await?
                {
                    return Err(FlowError::Conflict("username is already taken".to_string()));
                }
                name.to_string()
            }
            None => self.synthesize_username(project.project_id, &email).await?,
        };

        let password = Password::new(password.to_string());
        let hash = hash_password(&password).map_err(AppError::InternalError)?;

        let user = EndUser::new_local(project.project_id, email, username, hash.into_string());
        match self.credentials.insert_user(&user).await {
            Ok(()) => Ok(user),
            Err(AppError::Conflict(_)) => Err(FlowError::Conflict(
                "email is already registered for this project".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Check email/password against the stored account. Failure modes are
    /// deliberately coarse; only the provider mismatch is distinguished so
    /// the login UI can point the user at the right button.
    pub async fn authenticate_local(
        &self,
        project: &Project,
        email: &str,
        password: &str,
    ) -> Result<EndUser, FlowError> {
        let user = self
            .credentials
            .find_by_email(project.project_id, email)
            .await?
            .ok_or(FlowError::InvalidCredentials)?;

        let Some(stored_hash) = &user.password_hash else {
            return Err(FlowError::ProviderMismatch);
        };

        let password = Password::new(password.to_string());
        let hash = PasswordHashString::new(stored_hash.clone());
        verify_password(&password, &hash).map_err(|_| FlowError::InvalidCredentials)?;

        Ok(user)
    }

    /// Find the account a federated profile maps to, creating it on first
    /// login. An existing account under the same email but a different
    /// provider is never silently linked.
    pub async fn resolve_federated(
        &self,
        project: &Project,
        profile: &FederatedProfile,
    ) -> Result<EndUser, FlowError> {
        if let Some(mut user) = self
            .credentials
            .find_by_provider_identity(
                project.project_id,
                profile.provider.as_str(),
                &profile.provider_user_id,
            )
            .await?
        {
            if user.avatar_url != profile.avatar_url {
                self.credentials
                    .update_avatar(user.user_id, profile.avatar_url.as_deref())
                    .await?;
                user.avatar_url = profile.avatar_url.clone();
            }
            return Ok(user);
        }

        let email = profile.email.trim().to_lowercase();
        if let Some(existing) = self
            .credentials
            .find_by_email(project.project_id, &email)
            .await?
        {
            if existing.provider != profile.provider.as_str() {
                return Err(FlowError::ProviderMismatch);
            }
        }

        let base = profile
            .username_hint
            .as_deref()
            .unwrap_or(email.as_str());
        let username = self.synthesize_username(project.project_id, base).await?;

        let user = EndUser::new_federated(
            project.project_id,
            email,
            username,
            profile.provider,
            Some(profile.provider_user_id.clone()),
            profile.avatar_url.clone(),
            profile.email_verified,
        );
        match self.credentials.insert_user(&user).await {
            Ok(()) => Ok(user),
            // Lost a creation race; the other login won, reuse its row.
            Err(AppError::Conflict(_)) => self
                .credentials
                .find_by_provider_identity(
                    project.project_id,
                    profile.provider.as_str(),
                    &profile.provider_user_id,
                )
                .await?
                .ok_or(FlowError::ProviderMismatch),
            Err(e) => Err(e.into()),
        }
    }

    /// Derive a free username from an email or display name: lowercase
    /// `[a-z0-9_]` base, then a few tries with a random 4-digit suffix.
    async fn synthesize_username(
        &self,
        project_id: Uuid,
        base: &str,
    ) -> Result<String, FlowError> {
        let stem = sanitize_username(base);

        if !self.credentials.username_taken(project_id, &stem).await? {
            return Ok(stem);
        }

        for _ in 0..USERNAME_SUFFIX_ATTEMPTS {
            let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
            let candidate = format!("{}_{:04}", stem, suffix);
            if !self
                .credentials
                .username_taken(project_id, &candidate)
                .await?
            {
                return Ok(candidate);
            }
        }

        Err(FlowError::Conflict(
            "could not allocate a unique username".to_string(),
        ))
    }
}

fn sanitize_username(input: &str) -> String {
    // Everything before an @, lowercased, restricted to [a-z0-9_].
    let local = input.split('@').next().unwrap_or(input);
    let mut out: String = local
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(USERNAME_MAX_LEN);
    if out.trim_matches('_').is_empty() {
        out = "user".to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;
    use crate::services::credentials::MemoryCredentialStore;

    fn project() -> Project {
        Project {
            project_id: Uuid::new_v4(),
            name: "demo".into(),
            public_key: "pk_demo".into(),
            private_key: "sk_demo".into(),
            redirect_uris: vec![],
            enabled_providers: vec!["local".into(), "google".into()],
            allowed_origins: vec![],
            webhook_urls: vec![],
            verification_template: None,
            created_utc: chrono::Utc::now(),
        }
    }

    fn google_profile(email: &str, provider_user_id: &str) -> FederatedProfile {
        FederatedProfile {
            provider: ProviderKind::Google,
            provider_user_id: provider_user_id.into(),
            email: email.into(),
            username_hint: Some("Jane Doe".into()),
            avatar_url: Some("https://img.test/a.png".into()),
            email_verified: true,
        }
    }

    #[test]
    fn sanitize_strips_domain_and_symbols() {
        assert_eq!(sanitize_username("Jane.Doe+spam@x.com"), "jane_doe_spam");
        assert_eq!(sanitize_username("Jane Doe"), "jane_doe");
        assert_eq!(sanitize_username("@@@"), "user");
    }

    #[tokio::test]
    async fn register_hashes_and_starts_unverified() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();

        let user = svc
            .register_local(&project, "U@X.com", "Passw0rd!", Some("jane"))
            .await
            .unwrap();

        assert_eq!(user.email, "u@x.com");
        assert!(!user.is_verified);
        let hash = user.password_hash.as_deref().unwrap();
        assert!(hash.starts_with("$argon2"));
        assert_ne!(hash, "Passw0rd!");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();

        svc.register_local(&project, "u@x.com", "Passw0rd!", None)
            .await
            .unwrap();
        let err = svc
            .register_local(&project, "u@x.com", "Other1234", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Conflict(_)));
    }

    #[tokio::test]
    async fn authenticate_checks_password() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();
        svc.register_local(&project, "u@x.com", "Passw0rd!", None)
            .await
            .unwrap();

        assert!(svc
            .authenticate_local(&project, "u@x.com", "Passw0rd!")
            .await
            .is_ok());
        let err = svc
            .authenticate_local(&project, "u@x.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidCredentials));
        let err = svc
            .authenticate_local(&project, "nobody@x.com", "Passw0rd!")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidCredentials));
    }

    #[tokio::test]
    async fn password_login_on_federated_account_is_a_mismatch() {
        let store = Arc::new(MemoryCredentialStore::new());
        let svc = IdentityService::new(store.clone());
        let project = project();

        svc.resolve_federated(&project, &google_profile("g@x.com", "goog-1"))
            .await
            .unwrap();

        let err = svc
            .authenticate_local(&project, "g@x.com", "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ProviderMismatch));
    }

    #[tokio::test]
    async fn federated_login_is_find_or_create() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();
        let profile = google_profile("g@x.com", "goog-1");

        let first = svc.resolve_federated(&project, &profile).await.unwrap();
        let second = svc.resolve_federated(&project, &profile).await.unwrap();
        assert_eq!(first.user_id, second.user_id);
        assert!(first.is_verified);
        assert!(first.username.starts_with("jane_doe"));
    }

    #[tokio::test]
    async fn federated_does_not_link_local_accounts() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();
        svc.register_local(&project, "u@x.com", "Passw0rd!", None)
            .await
            .unwrap();

        let err = svc
            .resolve_federated(&project, &google_profile("u@x.com", "goog-9"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ProviderMismatch));
    }

    #[tokio::test]
    async fn username_collision_gets_a_suffix() {
        let svc = IdentityService::new(Arc::new(MemoryCredentialStore::new()));
        let project = project();

        let a = svc
            .register_local(&project, "jane@x.com", "Passw0rd!", None)
            .await
            .unwrap();
        let b = svc
            .register_local(&project, "jane@y.com", "Passw0rd!", None)
            .await
            .unwrap();

        assert_eq!(a.username, "jane");
        assert!(b.username.starts_with("jane_"));
        assert_ne!(a.username, b.username);
    }
}
