//! PostgreSQL persistence for projects, end users, OTPs, and sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{EndUser, OtpCode, Project, Session};
use crate::services::credentials::CredentialStore;
use crate::services::registry::ProjectRegistry;
use crate::services::session_store::SessionStore;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "identity-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Check database health.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

// ==================== Project Operations ====================

#[async_trait]
impl ProjectRegistry for Database {
    async fn resolve_by_public_key(&self, public_key: &str) -> Result<Option<Project>, AppError> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE public_key = $1")
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn resolve_by_id(&self, project_id: Uuid) -> Result<Option<Project>, AppError> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.ping().await
    }
}

// ==================== End-User Operations ====================

#[async_trait]
impl CredentialStore for Database {
    async fn find_by_email(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<EndUser>, AppError> {
        sqlx::query_as::<_, EndUser>(
            "SELECT * FROM end_users WHERE project_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(project_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<EndUser>, AppError> {
        sqlx::query_as::<_, EndUser>("SELECT * FROM end_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_by_provider_identity(
        &self,
        project_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<EndUser>, AppError> {
        sqlx::query_as::<_, EndUser>(
            "SELECT * FROM end_users WHERE project_id = $1 AND provider = $2 AND provider_user_id = $3",
        )
        .bind(project_id)
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn username_taken(&self, project_id: Uuid, username: &str) -> Result<bool, AppError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM end_users WHERE project_id = $1 AND username = $2 LIMIT 1",
        )
        .bind(project_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(row.is_some())
    }

    async fn insert_user(&self, user: &EndUser) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO end_users (user_id, project_id, email, username, password_hash, provider, provider_user_id, avatar_url, is_verified, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(user.project_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.provider)
        .bind(&user.provider_user_id)
        .bind(&user.avatar_url)
        .bind(user.is_verified)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "email or username already registered for this project"
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!(e)),
        })?;
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE end_users SET is_verified = true, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn update_avatar(
        &self,
        user_id: Uuid,
        avatar_url: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE end_users SET avatar_url = $1, updated_utc = NOW() WHERE user_id = $2")
            .bind(avatar_url)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== OTP Operations ====================

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO otp_codes (otp_id, project_id, email, code_hash, expiry_utc, consumed_utc, attempt_count, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(otp.otp_id)
        .bind(otp.project_id)
        .bind(&otp.email)
        .bind(&otp.code_hash)
        .bind(otp.expiry_utc)
        .bind(otp.consumed_utc)
        .bind(otp.attempt_count)
        .bind(otp.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_latest_otp(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> Result<Option<OtpCode>, AppError> {
        sqlx::query_as::<_, OtpCode>(
            r#"
            SELECT * FROM otp_codes
            WHERE project_id = $1 AND LOWER(email) = LOWER($2) AND consumed_utc IS NULL
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn record_otp_attempt(&self, otp_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE otp_codes SET attempt_count = attempt_count + 1 WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE otp_codes SET consumed_utc = NOW() WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn invalidate_otps(&self, project_id: Uuid, email: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE otp_codes SET consumed_utc = NOW()
            WHERE project_id = $1 AND LOWER(email) = LOWER($2) AND consumed_utc IS NULL
            "#,
        )
        .bind(project_id)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionStore for Database {
    async fn insert(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, project_id, token_hash, expiry_utc, is_valid, ip_address, user_agent, created_utc, rotated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(session.project_id)
        .bind(&session.token_hash)
        .bind(session.expiry_utc)
        .bind(session.is_valid)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_utc)
        .bind(session.rotated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AppError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// One conditional UPDATE so concurrent refreshes of the same token
    /// cannot both succeed. Zero rows means the hash was already rotated,
    /// invalidated, or expired.
    async fn rotate(
        &self,
        old_token_hash: &str,
        new_token_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET token_hash = $2, expiry_utc = $3, rotated_utc = NOW()
            WHERE token_hash = $1 AND is_valid = true AND expiry_utc > NOW()
            RETURNING *
            "#,
        )
        .bind(old_token_hash)
        .bind(new_token_hash)
        .bind(new_expiry)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn invalidate(&self, token_hash: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE sessions SET is_valid = false WHERE token_hash = $1 AND is_valid = true")
                .bind(token_hash)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_user_sessions(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE sessions SET is_valid = false WHERE user_id = $1 AND is_valid = true")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }
}
