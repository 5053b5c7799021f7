use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::Project;

/// Lookup surface for project (tenant) configuration.
///
/// The engine never writes projects; provisioning happens out of band.
/// Backed by Postgres in production and by [`StaticProjectRegistry`] in
/// tests.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Resolve a project by the public key browser SDKs send.
    async fn resolve_by_public_key(&self, public_key: &str) -> Result<Option<Project>, AppError>;

    /// Resolve a project by its id, used on refresh where only the
    /// project id survives inside the token.
    async fn resolve_by_id(&self, project_id: Uuid) -> Result<Option<Project>, AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Fixed in-memory registry seeded at construction.
pub struct StaticProjectRegistry {
    projects: Vec<Project>,
}

impl StaticProjectRegistry {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ProjectRegistry for StaticProjectRegistry {
    async fn resolve_by_public_key(&self, public_key: &str) -> Result<Option<Project>, AppError> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.public_key == public_key)
            .cloned())
    }

    async fn resolve_by_id(&self, project_id: Uuid) -> Result<Option<Project>, AppError> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.project_id == project_id)
            .cloned())
    }
}
