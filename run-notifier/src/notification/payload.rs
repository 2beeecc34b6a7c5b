//! Notification values and the payloads built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{NotificationConfig, Trigger};
use crate::domain::{RunEvent, RunStatus, Workspace};

/// Version of [`GenericPayload`] emitted by this crate.
pub const PAYLOAD_VERSION: u32 = 1;

/// A single notification handed to a destination client.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: RunEvent,
    pub trigger: Trigger,
    pub config: NotificationConfig,
    pub workspace: Workspace,
    /// Externally reachable hostname of the platform.
    pub hostname: String,
}

impl Notification {
    pub fn run_url(&self) -> String {
        self.workspace.run_url(&self.hostname, &self.event.run_id)
    }

    /// Build the versioned JSON payload shared by generic webhooks and pub/sub.
    pub fn generic_payload(&self) -> GenericPayload {
        GenericPayload {
            payload_version: PAYLOAD_VERSION,
            notification_configuration_id: self.config.id.clone(),
            run_url: self.run_url(),
            run_id: self.event.run_id.clone(),
            run_created_at: self.event.created_at(),
            workspace_id: self.workspace.id.clone(),
            workspace_name: self.workspace.name.clone(),
            organization_name: self.workspace.organization.clone(),
            notifications: vec![GenericNotificationPayload {
                message: Some(self.trigger.message().to_string()),
                trigger: self.trigger,
                run_status: self.event.status,
                run_updated_at: self.event.updated_at(),
            }],
        }
    }

    /// One-line human-readable summary, used by chat destinations.
    pub fn summary(&self) -> String {
        format!(
            "{}: run {} in {}/{} is {}: {}",
            self.trigger.message(),
            self.event.run_id,
            self.workspace.organization,
            self.workspace.name,
            self.event.status,
            self.run_url()
        )
    }
}

/// Versioned payload delivered to generic webhooks and pub/sub topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericPayload {
    pub payload_version: u32,
    pub notification_configuration_id: String,
    pub run_url: String,
    pub run_id: String,
    pub run_created_at: Option<DateTime<Utc>>,
    pub workspace_id: String,
    pub workspace_name: String,
    pub organization_name: String,
    pub notifications: Vec<GenericNotificationPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericNotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub trigger: Trigger,
    pub run_status: RunStatus,
    pub run_updated_at: Option<DateTime<Utc>>,
}
