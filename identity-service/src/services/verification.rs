use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::OtpConfig;
use crate::models::{EndUser, OtpCode, Project};
use crate::services::credentials::CredentialStore;
use crate::services::error::FlowError;
use crate::services::mailer::VerificationMailer;
use crate::utils::sha256_hex;

/// Email-ownership gate for local accounts.
///
/// Codes are 6 digits, stored hashed, single-use, time-bounded, and
/// attempt-capped. The same `invalid_grant` answer covers unknown
/// emails, wrong codes, and expired codes so callers cannot probe for
/// accounts.
#[derive(Clone)]
pub struct VerificationService {
    credentials: Arc<dyn CredentialStore>,
    mailer: Arc<dyn VerificationMailer>,
    config: OtpConfig,
}

impl VerificationService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        mailer: Arc<dyn VerificationMailer>,
        config: OtpConfig,
    ) -> Self {
        Self {
            credentials,
            mailer,
            config,
        }
    }

    /// Invalidate outstanding codes, mint a fresh one, and email it. At
    /// most one code per address is ever redeemable.
    pub async fn issue_code(&self, project: &Project, email: &str) -> Result<(), FlowError> {
        let email = email.trim().to_lowercase();
        self.credentials
            .invalidate_otps(project.project_id, &email)
            .await?;

        let digits: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let code = format!("{:06}", digits);

        let otp = OtpCode::new(
            project.project_id,
            email.clone(),
            sha256_hex(&code),
            self.config.expiry_seconds,
        );
        self.credentials.insert_otp(&otp).await?;

        self.mailer
            .send_verification_code(project, &email, &code)
            .await?;

        tracing::info!(project_id = %project.project_id, "verification code issued");
        Ok(())
    }

    /// Check a submitted code and mark the account verified on success.
    pub async fn verify_code(
        &self,
        project: &Project,
        email: &str,
        otp: &str,
    ) -> Result<EndUser, FlowError> {
        let invalid = || FlowError::InvalidGrant("invalid or expired verification code".to_string());

        let mut user = self
            .credentials
            .find_by_email(project.project_id, email)
            .await?
            .ok_or_else(invalid)?;

        let stored = self
            .credentials
            .find_latest_otp(project.project_id, email)
            .await?
            .ok_or_else(invalid)?;

        if stored.is_expired() || stored.is_consumed() {
            return Err(invalid());
        }
        if stored.attempts_exhausted(self.config.max_attempts) {
            return Err(FlowError::InvalidGrant(
                "too many verification attempts, request a new code".to_string(),
            ));
        }

        // Burn the attempt before comparing so a crash cannot hand out
        // free retries.
        self.credentials.record_otp_attempt(stored.otp_id).await?;

        let supplied = sha256_hex(otp.trim());
        let matches: bool = supplied
            .as_bytes()
            .ct_eq(stored.code_hash.as_bytes())
            .into();
        if !matches {
            return Err(invalid());
        }

        self.credentials.consume_otp(stored.otp_id).await?;
        self.credentials.mark_verified(user.user_id).await?;
        user.is_verified = true;

        tracing::info!(project_id = %project.project_id, user_id = %user.user_id, "email verified");
        Ok(user)
    }

    /// Re-send a code. Unknown addresses and already-verified accounts
    /// answer identically to a real send.
    pub async fn resend(&self, project: &Project, email: &str) -> Result<(), FlowError> {
        let user = self
            .credentials
            .find_by_email(project.project_id, email)
            .await?;

        match user {
            Some(user) if !user.is_verified => self.issue_code(project, email).await,
            _ => Ok(()),
        }
    }
}
