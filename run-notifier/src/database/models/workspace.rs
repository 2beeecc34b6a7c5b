//! Workspace database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct WorkspaceDbModel {
    pub id: String,
    pub name: String,
    pub organization_name: String,
}

impl WorkspaceDbModel {
    pub fn from_domain(workspace: &Workspace) -> Self {
        Self {
            id: workspace.id.clone(),
            name: workspace.name.clone(),
            organization_name: workspace.organization.clone(),
        }
    }

    pub fn into_domain(self) -> Workspace {
        Workspace::new(self.id, self.name, self.organization_name)
    }
}
