//! Run notifications.
//!
//! Workspaces subscribe to run status changes through notification
//! configurations; the [`Notifier`] relays matching changes to each
//! configuration's destination.
//!
//! - [`config`]: configurations, destinations and triggers
//! - [`clients`]: one client per destination type
//! - [`cache`]: reference-counted client sharing between configurations
//! - [`notifier`]: the event loop
//! - [`service`]: the configuration write path
//! - [`relay`]: configuration changes made by other replicas

pub mod cache;
pub mod clients;
pub mod config;
pub mod events;
pub mod notifier;
pub mod payload;
pub mod relay;
pub mod service;
pub mod trigger;

pub use cache::{ConnectionCache, DeliveryTarget};
pub use clients::{ClientFactory, ClientSettings, DefaultClientFactory, DestinationClient};
pub use config::{
    CreateConfigOptions, Destination, NotificationConfig, Trigger, UpdateConfigOptions,
};
pub use events::{
    BroadcastEvent, ConfigEvent, ConfigEventBroadcaster, EventBroadcaster, RunEventBroadcaster,
};
pub use notifier::{DEFAULT_PUBLISH_TIMEOUT, Notifier};
pub use payload::{GenericNotificationPayload, GenericPayload, Notification, PAYLOAD_VERSION};
pub use relay::ConfigEventRelay;
pub use service::NotificationConfigService;
pub use trigger::match_trigger;
