//! Event broadcasting.
//!
//! Run status changes and notification configuration changes are distributed
//! over tokio broadcast channels so the notifier, and anything else
//! interested, can subscribe independently.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::config::NotificationConfig;
use crate::domain::RunEvent;

/// Events that can be broadcast.
pub trait BroadcastEvent: Clone + Send + 'static {
    /// Get a description of the event for logging.
    fn description(&self) -> String;
}

/// Change to a notification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum ConfigEvent {
    Created(NotificationConfig),
    Updated(NotificationConfig),
    /// Carries the configuration as it was before deletion.
    Deleted(NotificationConfig),
}

impl ConfigEvent {
    pub fn config(&self) -> &NotificationConfig {
        match self {
            Self::Created(config) | Self::Updated(config) | Self::Deleted(config) => config,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

impl BroadcastEvent for ConfigEvent {
    fn description(&self) -> String {
        match self {
            Self::Created(config) => format!("Notification config created: {}", config.id),
            Self::Updated(config) => format!("Notification config updated: {}", config.id),
            Self::Deleted(config) => format!("Notification config deleted: {}", config.id),
        }
    }
}

impl BroadcastEvent for RunEvent {
    fn description(&self) -> String {
        format!("Run {} is {}", self.run_id, self.status)
    }
}

/// Default channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcaster for events of type `T`.
pub struct EventBroadcaster<T: BroadcastEvent> {
    sender: broadcast::Sender<T>,
}

/// Broadcaster of run status changes.
pub type RunEventBroadcaster = EventBroadcaster<RunEvent>;
/// Broadcaster of notification configuration changes.
pub type ConfigEventBroadcaster = EventBroadcaster<ConfigEvent>;

impl<T: BroadcastEvent> EventBroadcaster<T> {
    /// Create a new broadcaster with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish an event.
    ///
    /// Returns the number of receivers that received the event, 0 if there
    /// are no active subscribers.
    pub fn publish(&self, event: T) -> usize {
        tracing::debug!("Publishing event: {}", event.description());
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: BroadcastEvent> Default for EventBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BroadcastEvent> Clone for EventBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
