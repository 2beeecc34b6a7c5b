//! Notification configuration service.
//!
//! The only writer of notification configurations. Every change is validated,
//! then persisted together with an entry in the cluster-wide configuration
//! outbox, and finally announced on this replica's configuration event
//! broadcaster. Other replicas pick the change up from the outbox.

use std::sync::Arc;

use tracing::info;

use super::clients;
use super::config::{CreateConfigOptions, NotificationConfig, UpdateConfigOptions};
use super::events::{ConfigEvent, ConfigEventBroadcaster};
use crate::Result;
use crate::database::repositories::NotificationConfigRepository;

pub struct NotificationConfigService {
    repo: Arc<dyn NotificationConfigRepository>,
    events: ConfigEventBroadcaster,
    /// Identity of this replica in the configuration outbox.
    origin: String,
}

impl NotificationConfigService {
    pub fn new(repo: Arc<dyn NotificationConfigRepository>, events: ConfigEventBroadcaster) -> Self {
        Self {
            repo,
            events,
            origin: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Record changes under the given replica identity.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    async fn commit(&self, event: ConfigEvent) -> Result<()> {
        self.repo.apply_change(&self.origin, &event).await?;
        self.events.publish(event);
        Ok(())
    }

    /// Create a configuration for a workspace.
    ///
    /// Pub/sub URLs are checked here as well, so a malformed topic is rejected
    /// up front instead of surfacing when the notifier builds a client.
    pub async fn create(
        &self,
        workspace_id: &str,
        opts: CreateConfigOptions,
    ) -> Result<NotificationConfig> {
        let config = NotificationConfig::new(workspace_id, opts)?;
        clients::validate(&config)?;

        self.commit(ConfigEvent::Created(config.clone())).await?;
        info!(
            config_id = %config.id,
            workspace_id = %config.workspace_id,
            destination = %config.destination_type,
            "Created notification configuration"
        );
        Ok(config)
    }

    /// Apply a partial update.
    pub async fn update(&self, id: &str, opts: UpdateConfigOptions) -> Result<NotificationConfig> {
        let mut config = self.get(id).await?;
        config.update(opts)?;
        clients::validate(&config)?;

        self.commit(ConfigEvent::Updated(config.clone())).await?;
        info!(config_id = %config.id, "Updated notification configuration");
        Ok(config)
    }

    /// Delete a configuration, returning it as it was.
    pub async fn delete(&self, id: &str) -> Result<NotificationConfig> {
        let config = self.get(id).await?;
        self.commit(ConfigEvent::Deleted(config.clone())).await?;
        info!(config_id = %config.id, "Deleted notification configuration");
        Ok(config)
    }

    pub async fn get(&self, id: &str) -> Result<NotificationConfig> {
        let model = self.repo.get_config(id).await?;
        NotificationConfig::from_db_model(&model)
    }

    pub async fn list(&self, workspace_id: &str) -> Result<Vec<NotificationConfig>> {
        self.repo
            .list_configs(workspace_id)
            .await?
            .iter()
            .map(NotificationConfig::from_db_model)
            .collect()
    }

    pub async fn list_all(&self) -> Result<Vec<NotificationConfig>> {
        self.repo
            .list_all_configs()
            .await?
            .iter()
            .map(NotificationConfig::from_db_model)
            .collect()
    }
}
