//! Destination clients.
//!
//! One client per destination protocol:
//! - Generic webhooks (HTTP POST of the versioned JSON payload)
//! - Slack-style chat webhooks (HTTP POST of `{"text": ...}`)
//! - Google Cloud pub/sub topics
//! - Email, accepted for API compatibility and otherwise a no-op
//!
//! The [`ClientFactory`] maps a configuration's destination type to the
//! matching client, validating destination-specific parameters on the way.

mod email;
mod pubsub;
mod slack;
mod webhook;

pub use email::EmailClient;
pub use pubsub::{
    PUBSUB_SCHEME, PubSubClient, PubSubCredentials, PubSubSettings, TopicName,
    DEFAULT_PUBSUB_ENDPOINT,
};
pub use slack::SlackClient;
pub use webhook::WebhookClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::config::{Destination, NotificationConfig};
use super::payload::Notification;
use crate::{Error, Result};

/// A live connection to one external destination.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Destination type served by this client.
    fn destination(&self) -> Destination;

    /// Deliver a notification.
    async fn publish(&self, notification: &Notification) -> Result<()>;

    /// Release the underlying connections. Calling this more than once is a no-op.
    async fn close(&self);
}

/// Constructs destination clients from configurations.
pub trait ClientFactory: Send + Sync {
    fn new_client(&self, config: &NotificationConfig) -> Result<Arc<dyn DestinationClient>>;
}

/// Settings shared by every client the default factory builds.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    pub pubsub: PubSubSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pubsub: PubSubSettings::default(),
        }
    }
}

/// Factory building the real protocol clients.
#[derive(Debug, Clone, Default)]
pub struct DefaultClientFactory {
    settings: ClientSettings,
}

impl DefaultClientFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl ClientFactory for DefaultClientFactory {
    fn new_client(&self, config: &NotificationConfig) -> Result<Arc<dyn DestinationClient>> {
        let timeout = self.settings.request_timeout;
        let client: Arc<dyn DestinationClient> = match config.destination_type {
            Destination::Generic => Arc::new(WebhookClient::new(required_url(config)?, timeout)?),
            Destination::Slack => Arc::new(SlackClient::new(required_url(config)?, timeout)?),
            Destination::GcpPubSub => Arc::new(PubSubClient::new(
                required_url(config)?,
                self.settings.pubsub.clone(),
                timeout,
            )?),
            Destination::Email => Arc::new(EmailClient),
        };
        Ok(client)
    }
}

/// Check destination-specific parameters without opening a client.
pub fn validate(config: &NotificationConfig) -> Result<()> {
    match config.destination_type {
        Destination::Generic | Destination::Slack => required_url(config).map(|_| ()),
        Destination::GcpPubSub => TopicName::parse(required_url(config)?).map(|_| ()),
        Destination::Email => Ok(()),
    }
}

fn required_url(config: &NotificationConfig) -> Result<&str> {
    config.url.as_deref().ok_or(Error::DestinationRequiresUrl)
}
