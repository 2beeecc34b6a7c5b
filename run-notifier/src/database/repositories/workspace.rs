//! Workspace repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::WorkspaceDbModel;
use crate::{Error, Result};

#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn get_workspace(&self, id: &str) -> Result<WorkspaceDbModel>;
    /// Insert a workspace, or replace its name and organization.
    async fn upsert_workspace(&self, workspace: &WorkspaceDbModel) -> Result<()>;
}

/// SQLx implementation of WorkspaceRepository.
pub struct SqlxWorkspaceRepository {
    pool: SqlitePool,
}

impl SqlxWorkspaceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRepository for SqlxWorkspaceRepository {
    async fn get_workspace(&self, id: &str) -> Result<WorkspaceDbModel> {
        sqlx::query_as::<_, WorkspaceDbModel>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Workspace", id))
    }

    async fn upsert_workspace(&self, workspace: &WorkspaceDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, organization_name)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                organization_name = excluded.organization_name
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.organization_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
