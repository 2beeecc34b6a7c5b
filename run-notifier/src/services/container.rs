//! Service container for dependency injection.
//!
//! The ServiceContainer wires repositories, broadcasters and services
//! together and manages the notifier's lifecycle. Every replica relays
//! configuration changes made elsewhere in the cluster; only the elected
//! replica runs the notifier.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{HostnameService, RepositoryWorkspaceService, StaticHostname, WorkspaceService};
use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{
    SqlxConfigOutboxRepository, SqlxLeaseRepository, SqlxNotificationConfigRepository,
    SqlxWorkspaceRepository,
};
use crate::leader::{LeaderElection, NOTIFIER_LOCK_ID};
use crate::notification::{
    ConfigEventBroadcaster, ConfigEventRelay, DefaultClientFactory, NotificationConfigService,
    Notifier, RunEventBroadcaster,
};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Run status changes; producers publish here.
    pub run_events: RunEventBroadcaster,
    /// Notification configuration changes.
    pub config_events: ConfigEventBroadcaster,
    /// Write path for notification configurations.
    pub notification_configs: Arc<NotificationConfigService>,
    pub workspaces: Arc<RepositoryWorkspaceService>,
    pub notifier: Arc<Notifier>,
    /// Feed of configuration changes made by other replicas.
    pub config_relay: Arc<ConfigEventRelay>,
    pub leader: Arc<LeaderElection>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a new service container over an initialized, migrated pool.
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Self {
        info!("Initializing service container");

        let config_repo = Arc::new(SqlxNotificationConfigRepository::new(pool.clone()));
        let workspace_repo = Arc::new(SqlxWorkspaceRepository::new(pool.clone()));
        let lease_repo = Arc::new(SqlxLeaseRepository::new(pool.clone()));
        let outbox_repo = Arc::new(SqlxConfigOutboxRepository::new(pool.clone()));

        let leader =
            Arc::new(LeaderElection::new(lease_repo, NOTIFIER_LOCK_ID).with_ttl(config.lease_ttl));

        let run_events = RunEventBroadcaster::with_capacity(config.event_capacity);
        let config_events = ConfigEventBroadcaster::with_capacity(config.event_capacity);

        // The lease holder id doubles as this replica's outbox origin.
        let notification_configs = Arc::new(
            NotificationConfigService::new(config_repo.clone(), config_events.clone())
                .with_origin(leader.holder()),
        );
        let config_relay = Arc::new(
            ConfigEventRelay::new(outbox_repo, leader.holder(), config_events.clone())
                .with_poll_interval(config.config_poll_interval),
        );
        let workspaces = Arc::new(RepositoryWorkspaceService::new(workspace_repo));
        let hostname: Arc<dyn HostnameService> = Arc::new(StaticHostname::new(&config.hostname));

        let notifier = Arc::new(
            Notifier::new(
                config_repo,
                Arc::new(DefaultClientFactory::new(config.client_settings())),
                workspaces.clone() as Arc<dyn WorkspaceService>,
                hostname,
                run_events.clone(),
                config_events.clone(),
            )
            .with_publish_timeout(config.publish_timeout),
        );

        info!(holder = %leader.holder(), "Service container initialized");

        Self {
            pool,
            run_events,
            config_events,
            notification_configs,
            workspaces,
            notifier,
            config_relay,
            leader,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Spawn the configuration relay and the leader-elected notifier.
    ///
    /// The relay is primed first; changes other replicas commit after that
    /// point reach this replica's configuration subscribers.
    pub fn start_notifier(&self) -> JoinHandle<Result<()>> {
        let leader = self.leader.clone();
        let notifier = self.notifier.clone();
        let relay = self.config_relay.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            if let Err(e) = relay.prime().await {
                warn!(error = %e, "Failed to prime configuration relay");
            }

            let relaying = relay.run(token.clone());
            let leading = leader.run(token, |child| {
                let notifier = notifier.clone();
                let relay = relay.clone();
                async move {
                    // Drain changes the store already reflects before loading.
                    if let Err(e) = relay.relay_once().await {
                        warn!(error = %e, "Failed to catch up on configuration changes");
                    }
                    notifier.start(child).await
                }
            });

            let ((), result) = tokio::join!(relaying, leading);
            result
        })
    }

    /// Gracefully shutdown with the default timeout.
    pub async fn shutdown(&self, notifier: JoinHandle<Result<()>>) -> Result<()> {
        self.shutdown_with_timeout(notifier, DEFAULT_SHUTDOWN_TIMEOUT)
            .await
    }

    /// Cancel all services and wait up to `timeout` for the notifier to stop.
    pub async fn shutdown_with_timeout(
        &self,
        notifier: JoinHandle<Result<()>>,
        timeout: Duration,
    ) -> Result<()> {
        info!("Shutting down services");
        self.cancellation_token.cancel();

        match tokio::time::timeout(timeout, notifier).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => warn!(error = %e, "Notifier task panicked"),
            Err(_) => warn!("Shutdown timeout reached, forcing shutdown"),
        }

        self.pool.close().await;
        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
