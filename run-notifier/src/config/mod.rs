//! Application configuration.
//!
//! Read from the process environment once at startup. Variables are prefixed
//! with `RUN_NOTIFIER_`, except for the conventional `DATABASE_URL` and the
//! Google Cloud variables understood by pub/sub tooling.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notification::clients::{ClientSettings, PubSubCredentials, PubSubSettings};
use crate::{Error, Result};

const ENV_PREFIX: &str = "RUN_NOTIFIER_";

const DEFAULT_DATABASE_URL: &str = "sqlite:run-notifier.db?mode=rwc";
const DEFAULT_HOSTNAME: &str = "localhost:8080";
const DEFAULT_DB_POOL_SIZE: u32 = 5;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LEASE_TTL_SECS: u64 = 30;
const DEFAULT_CONFIG_POLL_INTERVAL_MS: u64 = 1000;

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directive; `RUST_LOG` takes precedence when set.
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Directory for a daily rolling log file, in addition to stdout.
    pub dir: Option<PathBuf>,
}

/// Process-wide configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_pool_size: u32,
    /// Externally reachable hostname used in run URLs.
    pub hostname: String,
    pub publish_timeout: Duration,
    pub lease_ttl: Duration,
    /// How often configuration changes made by other replicas are polled.
    pub config_poll_interval: Duration,
    /// Capacity of the run and configuration event channels.
    pub event_capacity: usize,
    /// `host:port` of a pub/sub emulator, if any.
    pub pubsub_emulator_host: Option<String>,
    #[serde(skip_serializing)]
    pub google_access_token: Option<String>,
    pub log: LogSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_pool_size: DEFAULT_DB_POOL_SIZE,
            hostname: DEFAULT_HOSTNAME.to_string(),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            config_poll_interval: Duration::from_millis(DEFAULT_CONFIG_POLL_INTERVAL_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            pubsub_emulator_host: None,
            google_access_token: None,
            log: LogSettings::default(),
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("db_pool_size", &self.db_pool_size)
            .field("hostname", &self.hostname)
            .field("publish_timeout", &self.publish_timeout)
            .field("lease_ttl", &self.lease_ttl)
            .field("config_poll_interval", &self.config_poll_interval)
            .field("event_capacity", &self.event_capacity)
            .field("pubsub_emulator_host", &self.pubsub_emulator_host)
            .field(
                "google_access_token",
                &self.google_access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("log", &self.log)
            .finish()
    }
}

impl AppConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            database_url: lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.database_url),
            db_pool_size: parse_var("DB_POOL_SIZE", var("DB_POOL_SIZE"))?
                .unwrap_or(defaults.db_pool_size),
            hostname: var("HOSTNAME").unwrap_or(defaults.hostname),
            publish_timeout: parse_var("PUBLISH_TIMEOUT_SECS", var("PUBLISH_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.publish_timeout),
            lease_ttl: parse_var("LEASE_TTL_SECS", var("LEASE_TTL_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            config_poll_interval: parse_var(
                "CONFIG_POLL_INTERVAL_MS",
                var("CONFIG_POLL_INTERVAL_MS"),
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.config_poll_interval),
            event_capacity: parse_var("EVENT_CAPACITY", var("EVENT_CAPACITY"))?
                .unwrap_or(defaults.event_capacity),
            pubsub_emulator_host: lookup("PUBSUB_EMULATOR_HOST").filter(|v| !v.is_empty()),
            google_access_token: lookup("GOOGLE_OAUTH_ACCESS_TOKEN").filter(|v| !v.is_empty()),
            log: LogSettings {
                filter: var("LOG"),
                json: parse_var("LOG_JSON", var("LOG_JSON"))?.unwrap_or(false),
                dir: var("LOG_DIR").map(PathBuf::from),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(Error::config("hostname cannot be empty"));
        }
        if self.db_pool_size == 0 {
            return Err(Error::config("database pool size must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event capacity must be at least 1"));
        }
        if self.publish_timeout.is_zero() {
            return Err(Error::config("publish timeout must be positive"));
        }
        if self.lease_ttl < Duration::from_secs(1) {
            return Err(Error::config("lease TTL must be at least one second"));
        }
        if self.config_poll_interval.is_zero() {
            return Err(Error::config("configuration poll interval must be positive"));
        }
        Ok(())
    }

    /// Settings for destination clients.
    pub fn client_settings(&self) -> ClientSettings {
        let pubsub = match (&self.pubsub_emulator_host, &self.google_access_token) {
            (Some(host), _) => PubSubSettings::emulator(host),
            (None, Some(token)) => PubSubSettings {
                credentials: PubSubCredentials::AccessToken(token.clone()),
                ..Default::default()
            },
            (None, None) => PubSubSettings::default(),
        };
        ClientSettings {
            request_timeout: self.publish_timeout,
            pubsub,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                Error::config(format!("invalid {}{}={:?}: {}", ENV_PREFIX, name, raw, e))
            })
        })
        .transpose()
}
