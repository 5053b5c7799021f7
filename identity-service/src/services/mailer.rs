use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::models::Project;

/// Outbound delivery of verification codes.
#[async_trait]
pub trait VerificationMailer: Send + Sync {
    async fn send_verification_code(
        &self,
        project: &Project,
        to_email: &str,
        code: &str,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let mut builder = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .timeout(Some(Duration::from_secs(10)));

        if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            builder = builder.credentials(creds);
        }

        let mailer = builder.build();
        tracing::info!(host = %config.host, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from_address.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send email in blocking thread pool to avoid blocking async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl VerificationMailer for SmtpMailer {
    async fn send_verification_code(
        &self,
        project: &Project,
        to_email: &str,
        code: &str,
    ) -> Result<(), AppError> {
        // Projects may override the body; `{{code}}` is the only placeholder.
        if let Some(template) = &project.verification_template {
            let body = template.replace("{{code}}", code);
            return self
                .send_email(
                    to_email,
                    &format!("Your {} verification code", project.name),
                    &body,
                    &body,
                )
                .await;
        }

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Verify your email for {}</h2>
                    <p>Enter this code to confirm your email address:</p>
                    <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{}</p>
                    <p style="color: #666; font-size: 12px;">
                        This code expires in a few minutes. If you didn't request it, please ignore this email.
                    </p>
                </body>
            </html>
            "###,
            project.name, code
        );

        let plain_body = format!(
            "Verify your email for {}\n\nEnter this code to confirm your email address:\n\n{}\n\nThis code expires in a few minutes. If you didn't request it, please ignore this email.",
            project.name, code
        );

        self.send_email(
            to_email,
            &format!("Your {} verification code", project.name),
            &plain_body,
            &html_body,
        )
        .await
    }
}

/// Records sends instead of delivering. Tests read back the last code.
#[derive(Default)]
pub struct MockMailer {
    pub sent: std::sync::Mutex<Vec<SentMail>>,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub project_id: uuid::Uuid,
    pub to_email: String,
    pub code: String,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|m| m.to_email == email)
            .map(|m| m.code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl VerificationMailer for MockMailer {
    async fn send_verification_code(
        &self,
        project: &Project,
        to_email: &str,
        code: &str,
    ) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("mock mailer poisoned: {}", e)))?
            .push(SentMail {
                project_id: project.project_id,
                to_email: to_email.to_string(),
                code: code.to_string(),
            });
        Ok(())
    }
}
