//! Reference-counted cache of destination clients.
//!
//! Many configurations may point at the same endpoint, e.g. several
//! subscriptions posting to one chat channel. An endpoint is a destination
//! type together with a URL. The cache keeps one live client per endpoint and
//! counts the configurations sharing it; the client is closed when the last of
//! them is removed.
//!
//! Invariants, maintained under a single lock:
//! - the sum of reference counts equals the number of cached configurations;
//! - no entry has a reference count of zero;
//! - every cached configuration has an entry for its endpoint.
//!
//! The lock only ever covers map mutation. Client construction does no I/O,
//! and clients are closed after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::clients::{ClientFactory, DestinationClient};
use super::config::NotificationConfig;
use crate::{Error, Result};

struct ClientEntry {
    client: Arc<dyn DestinationClient>,
    refs: usize,
}

#[derive(Default)]
struct CacheState {
    /// endpoint -> shared client
    clients: HashMap<String, ClientEntry>,
    /// configuration id -> configuration
    configs: HashMap<String, NotificationConfig>,
}

/// A cached configuration paired with the client serving it.
#[derive(Clone)]
pub struct DeliveryTarget {
    pub config: NotificationConfig,
    pub client: Arc<dyn DestinationClient>,
}

/// Keyed multiplexer of destination clients.
pub struct ConnectionCache {
    factory: Arc<dyn ClientFactory>,
    state: Mutex<CacheState>,
}

impl ConnectionCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cache a configuration, sharing or constructing its client.
    ///
    /// Fails if the configuration is already cached, or if a new client
    /// cannot be constructed for it.
    pub fn add(&self, config: NotificationConfig) -> Result<()> {
        let mut state = self.state.lock();

        if state.configs.contains_key(&config.id) {
            return Err(Error::internal(format!(
                "notification configuration {} is already cached",
                config.id
            )));
        }

        let endpoint = config.endpoint();
        match state.clients.get_mut(&endpoint) {
            Some(entry) => {
                entry.refs += 1;
                debug!(
                    config_id = %config.id,
                    destination = %config.destination_type,
                    refs = entry.refs,
                    "Reusing cached destination client"
                );
            }
            None => {
                let client = self.factory.new_client(&config)?;
                state
                    .clients
                    .insert(endpoint, ClientEntry { client, refs: 1 });
                info!(
                    config_id = %config.id,
                    destination = %config.destination_type,
                    "Opened destination client"
                );
            }
        }

        state.configs.insert(config.id.clone(), config);
        Ok(())
    }

    /// Remove a configuration, closing its client if no other configuration
    /// shares it.
    pub async fn remove(&self, config_id: &str) -> Result<()> {
        let released = {
            let mut state = self.state.lock();

            let config = state.configs.remove(config_id).ok_or_else(|| {
                Error::internal(format!(
                    "notification configuration {} is not cached",
                    config_id
                ))
            })?;

            let endpoint = config.endpoint();
            let Some(entry) = state.clients.get_mut(&endpoint) else {
                return Err(Error::internal(format!(
                    "no client cached for notification configuration {}",
                    config_id
                )));
            };

            entry.refs -= 1;
            if entry.refs == 0 {
                state.clients.remove(&endpoint).map(|e| (config, e.client))
            } else {
                None
            }
        };

        if let Some((config, client)) = released {
            client.close().await;
            info!(
                config_id = %config.id,
                destination = %config.destination_type,
                "Closed destination client"
            );
        }
        Ok(())
    }

    /// Look up the client serving a configuration.
    pub fn resolve(&self, config_id: &str) -> Option<Arc<dyn DestinationClient>> {
        let state = self.state.lock();
        let config = state.configs.get(config_id)?;
        state
            .clients
            .get(&config.endpoint())
            .map(|entry| Arc::clone(&entry.client))
    }

    /// Snapshot the enabled configurations of a workspace with their clients.
    pub fn targets(&self, workspace_id: &str) -> Vec<DeliveryTarget> {
        let state = self.state.lock();
        state
            .configs
            .values()
            .filter(|config| config.enabled && config.workspace_id == workspace_id)
            .filter_map(|config| {
                let entry = state.clients.get(&config.endpoint())?;
                Some(DeliveryTarget {
                    config: config.clone(),
                    client: Arc::clone(&entry.client),
                })
            })
            .collect()
    }

    /// Number of cached configurations.
    pub fn len(&self) -> usize {
        self.state.lock().configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Endpoints with a live client.
    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().clients.keys().cloned().collect()
    }

    /// Endpoint serving a cached configuration.
    pub fn endpoint_of(&self, config_id: &str) -> Option<String> {
        self.state
            .lock()
            .configs
            .get(config_id)
            .map(NotificationConfig::endpoint)
    }

    pub fn contains(&self, config_id: &str) -> bool {
        self.state.lock().configs.contains_key(config_id)
    }

    /// Drop every configuration and close every client.
    pub async fn close_all(&self) {
        let clients: Vec<_> = {
            let mut state = self.state.lock();
            state.configs.clear();
            state.clients.drain().map(|(_, e)| e.client).collect()
        };

        let count = clients.len();
        futures::future::join_all(clients.iter().map(|client| client.close())).await;
        if count > 0 {
            info!(clients = count, "Closed all destination clients");
        }
    }
}
