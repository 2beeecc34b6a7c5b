//! Workspace lookup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::database::models::WorkspaceDbModel;
use crate::database::repositories::WorkspaceRepository;
use crate::domain::Workspace;

/// Resolves workspace ids to the metadata used in notifications.
#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn get_workspace(&self, id: &str) -> Result<Workspace>;
}

/// Workspace service backed by the workspace repository.
pub struct RepositoryWorkspaceService {
    repo: Arc<dyn WorkspaceRepository>,
}

impl RepositoryWorkspaceService {
    pub fn new(repo: Arc<dyn WorkspaceRepository>) -> Self {
        Self { repo }
    }

    /// Register or rename a workspace.
    pub async fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.repo
            .upsert_workspace(&WorkspaceDbModel::from_domain(workspace))
            .await
    }
}

#[async_trait]
impl WorkspaceService for RepositoryWorkspaceService {
    async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        Ok(self.repo.get_workspace(id).await?.into_domain())
    }
}
