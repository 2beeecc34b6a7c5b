//! The notifier: relays run status changes to subscribed destinations.
//!
//! On start the notifier loads every persisted configuration into a fresh
//! [`ConnectionCache`], then handles run events and configuration events one
//! at a time until cancelled. Run events fan out to every matching
//! configuration of the run's workspace; configuration events keep the cache
//! in step with the store.
//!
//! A cache that falls out of step with the store cannot be repaired in place,
//! so configuration event failures end the loop with an error. The supervisor
//! (normally [`LeaderElection`](crate::leader::LeaderElection)) then restarts
//! it with a freshly loaded cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{ConnectionCache, DeliveryTarget};
use super::clients::ClientFactory;
use super::config::NotificationConfig;
use super::events::{BroadcastEvent, ConfigEvent, ConfigEventBroadcaster, RunEventBroadcaster};
use super::payload::Notification;
use super::trigger::match_trigger;
use crate::database::repositories::NotificationConfigRepository;
use crate::domain::RunEvent;
use crate::services::{HostnameService, WorkspaceService};
use crate::{Error, Result};

/// Default upper bound for a single publish call.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Notifier {
    configs: Arc<dyn NotificationConfigRepository>,
    factory: Arc<dyn ClientFactory>,
    workspaces: Arc<dyn WorkspaceService>,
    hostname: Arc<dyn HostnameService>,
    run_events: RunEventBroadcaster,
    config_events: ConfigEventBroadcaster,
    publish_timeout: Duration,
}

impl Notifier {
    pub fn new(
        configs: Arc<dyn NotificationConfigRepository>,
        factory: Arc<dyn ClientFactory>,
        workspaces: Arc<dyn WorkspaceService>,
        hostname: Arc<dyn HostnameService>,
        run_events: RunEventBroadcaster,
        config_events: ConfigEventBroadcaster,
    ) -> Self {
        Self {
            configs,
            factory,
            workspaces,
            hostname,
            run_events,
            config_events,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Run the notifier until `token` is cancelled or both event streams close.
    ///
    /// Returns an error if the configurations cannot be loaded or the cache
    /// falls out of step with the store. Every client is closed on return.
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        let cache = self.load().await?;
        let mut runs = self.run_events.subscribe();
        let mut configs = self.config_events.subscribe();

        info!(
            configs = cache.len(),
            clients = cache.client_count(),
            "Notifier started"
        );

        let result = self
            .event_loop(&cache, &token, &mut runs, &mut configs)
            .await;

        cache.close_all().await;
        match &result {
            Ok(()) => info!("Notifier stopped"),
            Err(e) => warn!(error = %e, "Notifier stopped with error"),
        }
        result
    }

    /// Build a cache from every persisted configuration.
    ///
    /// Configurations that cannot be decoded or whose client cannot be
    /// constructed are skipped.
    pub async fn load(&self) -> Result<ConnectionCache> {
        let cache = ConnectionCache::new(Arc::clone(&self.factory));

        for model in self.configs.list_all_configs().await? {
            let config = match NotificationConfig::from_db_model(&model) {
                Ok(config) => config,
                Err(e) => {
                    warn!(config_id = %model.id, error = %e, "Skipping unreadable notification configuration");
                    continue;
                }
            };
            let config_id = config.id.clone();
            if let Err(e) = cache.add(config) {
                warn!(config_id = %config_id, error = %e, "Skipping notification configuration");
            }
        }

        debug!(
            configs = cache.len(),
            clients = cache.client_count(),
            "Loaded notification configurations"
        );
        Ok(cache)
    }

    async fn event_loop(
        &self,
        cache: &ConnectionCache,
        token: &CancellationToken,
        runs: &mut broadcast::Receiver<RunEvent>,
        configs: &mut broadcast::Receiver<ConfigEvent>,
    ) -> Result<()> {
        let mut runs_open = true;
        let mut configs_open = true;

        while runs_open || configs_open {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Notifier cancelled");
                    return Ok(());
                }
                event = runs.recv(), if runs_open => match event {
                    Ok(event) => self.handle_run(cache, &event).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Run event listener lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Run event channel closed");
                        runs_open = false;
                    }
                },
                event = configs.recv(), if configs_open => match event {
                    Ok(event) => self.handle_config(cache, event).await?,
                    Err(RecvError::Lagged(n)) => {
                        return Err(Error::internal(format!(
                            "configuration event listener lagged by {} events",
                            n
                        )));
                    }
                    Err(RecvError::Closed) => {
                        debug!("Configuration event channel closed");
                        configs_open = false;
                    }
                },
            }
        }

        info!("Event channels closed");
        Ok(())
    }

    /// Publish a notification to every configuration subscribed to this run
    /// event. Failures are logged per configuration.
    pub async fn handle_run(&self, cache: &ConnectionCache, event: &RunEvent) {
        let Some(trigger) = match_trigger(event.status) else {
            return;
        };

        let targets: Vec<DeliveryTarget> = cache
            .targets(&event.workspace_id)
            .into_iter()
            .filter(|target| target.config.has_trigger(trigger))
            .collect();
        if targets.is_empty() {
            return;
        }

        let workspace = match self.workspaces.get_workspace(&event.workspace_id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(
                    run_id = %event.run_id,
                    workspace_id = %event.workspace_id,
                    error = %e,
                    "Failed to look up workspace, dropping run event"
                );
                return;
            }
        };
        let hostname = self.hostname.hostname();

        let deliveries = targets.into_iter().map(|target| {
            let notification = Notification {
                event: event.clone(),
                trigger,
                config: target.config.clone(),
                workspace: workspace.clone(),
                hostname: hostname.clone(),
            };
            async move { self.publish(&target, &notification).await }
        });
        futures::future::join_all(deliveries).await;
    }

    async fn publish(&self, target: &DeliveryTarget, notification: &Notification) {
        let result =
            match tokio::time::timeout(self.publish_timeout, target.client.publish(notification))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.publish_timeout)),
            };

        match result {
            Ok(()) => debug!(
                config_id = %notification.config.id,
                run_id = %notification.event.run_id,
                trigger = %notification.trigger,
                destination = %target.client.destination(),
                "Published notification"
            ),
            Err(e) => error!(
                config_id = %notification.config.id,
                run_id = %notification.event.run_id,
                trigger = %notification.trigger,
                destination = %target.client.destination(),
                error = %e,
                "Failed to publish notification"
            ),
        }
    }

    /// Apply a configuration change to the cache.
    pub async fn handle_config(&self, cache: &ConnectionCache, event: ConfigEvent) -> Result<()> {
        debug!("Handling {}", event.description());
        match event {
            ConfigEvent::Created(config) => cache.add(config),
            ConfigEvent::Updated(config) => {
                cache.remove(&config.id).await?;
                cache.add(config)
            }
            ConfigEvent::Deleted(config) => cache.remove(&config.id).await,
        }
    }
}
