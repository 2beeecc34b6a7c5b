//! Workspace metadata used to label outbound notifications.

use serde::{Deserialize, Serialize};

/// Read-only view of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub organization: String,
}

impl Workspace {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organization: organization.into(),
        }
    }

    /// Human-facing URL of a run in this workspace.
    pub fn run_url(&self, hostname: &str, run_id: &str) -> String {
        format!(
            "https://{}/app/organizations/{}/workspaces/{}/runs/{}",
            hostname, self.organization, self.name, run_id
        )
    }
}
