use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{EndUser, OtpCode};

/// Persistence surface for end-user accounts and their verification OTPs.
///
/// Emails are matched case-insensitively; callers pass them through
/// unchanged and the store normalizes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<EndUser>, AppError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<EndUser>, AppError>;

    /// Lookup by the identity a federated provider asserts.
    async fn find_by_provider_identity(
        &self,
        project_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<EndUser>, AppError>;

    async fn username_taken(&self, project_id: Uuid, username: &str) -> Result<bool, AppError>;

    /// Insert a new account. Duplicate email within the project maps to
    /// `AppError::Conflict`.
    async fn insert_user(&self, user: &EndUser) -> Result<(), AppError>;

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), AppError>;

    /// Refresh mutable profile fields on federated re-login.
    async fn update_avatar(&self, user_id: Uuid, avatar_url: Option<&str>)
        -> Result<(), AppError>;

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError>;

    /// Most recently issued unconsumed OTP for this address, if any.
    async fn find_latest_otp(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<OtpCode>, AppError>;

    async fn record_otp_attempt(&self, otp_id: Uuid) -> Result<(), AppError>;

    async fn consume_otp(&self, otp_id: Uuid) -> Result<(), AppError>;

    /// Consume every outstanding OTP for the address. Called before a
    /// fresh code is issued so only one code is ever redeemable.
    async fn invalidate_otps(&self, project_id: Uuid, email: &str) -> Result<(), AppError>;
}

/// In-memory credential store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: Mutex<Vec<EndUser>>,
    otps: Mutex<Vec<OtpCode>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_users(&self) -> Result<std::sync::MutexGuard<'_, Vec<EndUser>>, AppError> {
        self.users
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("user store poisoned: {}", e)))
    }

    fn lock_otps(&self) -> Result<std::sync::MutexGuard<'_, Vec<OtpCode>>, AppError> {
        self.otps
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("otp store poisoned: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<EndUser>, AppError> {
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .find(|u| u.project_id == project_id && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<EndUser>, AppError> {
        let users = self.lock_users()?;
        Ok(users.iter().find(|u| u.user_id == user_id).cloned())
    }

    async fn find_by_provider_identity(
        &self,
        project_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<EndUser>, AppError> {
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .find(|u| {
                u.project_id == project_id
                    && u.provider == provider
                    && u.provider_user_id.as_deref() == Some(provider_user_id)
            })
            .cloned())
    }

    async fn username_taken(&self, project_id: Uuid, username: &str) -> Result<bool, AppError> {
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .any(|u| u.project_id == project_id && u.username == username))
    }

    async fn insert_user(&self, user: &EndUser) -> Result<(), AppError> {
        let mut users = self.lock_users()?;
        if users
            .iter()
            .any(|u| u.project_id == user.project_id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "email already registered for this project"
            )));
        }
        users.push(user.clone());
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut users = self.lock_users()?;
        if let Some(user) = users.iter_mut().find(|u| u.user_id == user_id) {
            user.is_verified = true;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_url: Option<&str>,
    ) -> Result<(), AppError> {
        let mut users = self.lock_users()?;
        if let Some(user) = users.iter_mut().find(|u| u.user_id == user_id) {
            user.avatar_url = avatar_url.map(|s| s.to_string());
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        let mut otps = self.lock_otps()?;
        otps.push(otp.clone());
        Ok(())
    }

    async fn find_latest_otp(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<OtpCode>, AppError> {
        let otps = self.lock_otps()?;
        Ok(otps
            .iter()
            .filter(|o| {
                o.project_id == project_id
                    && o.email.eq_ignore_ascii_case(email)
                    && !o.is_consumed()
            })
            .max_by_key(|o| o.created_utc)
            .cloned())
    }

    async fn record_otp_attempt(&self, otp_id: Uuid) -> Result<(), AppError> {
        let mut otps = self.lock_otps()?;
        if let Some(otp) = otps.iter_mut().find(|o| o.otp_id == otp_id) {
            otp.attempt_count += 1;
        }
        Ok(())
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<(), AppError> {
        let mut otps = self.lock_otps()?;
        if let Some(otp) = otps.iter_mut().find(|o| o.otp_id == otp_id) {
            otp.consumed_utc = Some(Utc::now());
        }
        Ok(())
    }

    async fn invalidate_otps(&self, project_id: Uuid, email: &str) -> Result<(), AppError> {
        let mut otps = self.lock_otps()?;
        for otp in otps
            .iter_mut()
            .filter(|o| o.project_id == project_id && o.email.eq_ignore_ascii_case(email))
        {
            if otp.consumed_utc.is_none() {
                otp.consumed_utc = Some(Utc::now());
            }
        }
        Ok(())
    }
}
