//! Notification configurations.
//!
//! A [`NotificationConfig`] subscribes one workspace to one destination for a
//! set of run triggers. Configurations are created and edited through
//! [`NotificationConfigService`](super::NotificationConfigService); the
//! notifier only ever holds read-only copies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trigger::match_trigger;
use crate::database::models::NotificationConfigDbModel;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::RunStatus;
use crate::{Error, Result};

/// Destination platform for a notification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Destination {
    /// Generic JSON webhook.
    Generic,
    /// Chat webhook accepting `{"text": ...}` bodies.
    Slack,
    /// Google Cloud pub/sub topic.
    #[serde(rename = "gcppubsub")]
    #[strum(serialize = "gcppubsub")]
    GcpPubSub,
    /// Accepted for API compatibility only; never delivers anything.
    Email,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Whether configurations of this type must carry a URL.
    pub fn requires_url(&self) -> bool {
        !matches!(self, Self::Email)
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generic" => Ok(Self::Generic),
            "slack" => Ok(Self::Slack),
            "gcppubsub" => Ok(Self::GcpPubSub),
            "email" => Ok(Self::Email),
            other => Err(Error::UnsupportedDestinationType(other.to_string())),
        }
    }
}

/// Run transition a configuration can subscribe to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
pub enum Trigger {
    #[serde(rename = "run:created")]
    #[strum(serialize = "run:created")]
    Created,
    #[serde(rename = "run:planning")]
    #[strum(serialize = "run:planning")]
    Planning,
    #[serde(rename = "run:needs_attention")]
    #[strum(serialize = "run:needs_attention")]
    NeedsAttention,
    #[serde(rename = "run:applying")]
    #[strum(serialize = "run:applying")]
    Applying,
    #[serde(rename = "run:completed")]
    #[strum(serialize = "run:completed")]
    Completed,
    #[serde(rename = "run:errored")]
    #[strum(serialize = "run:errored")]
    Errored,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Short human-readable description used in message bodies.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Created => "Run Created",
            Self::Planning => "Run Planning",
            Self::NeedsAttention => "Run Needs Attention",
            Self::Applying => "Run Applying",
            Self::Completed => "Run Completed",
            Self::Errored => "Run Errored",
        }
    }
}

impl FromStr for Trigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run:created" => Ok(Self::Created),
            "run:planning" => Ok(Self::Planning),
            "run:needs_attention" => Ok(Self::NeedsAttention),
            "run:applying" => Ok(Self::Applying),
            "run:completed" => Ok(Self::Completed),
            "run:errored" => Ok(Self::Errored),
            other => Err(Error::InvalidTrigger(other.to_string())),
        }
    }
}

/// Options for creating a configuration, as received from the API layer.
///
/// String-typed fields are validated by [`NotificationConfig::new`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConfigOptions {
    /// Required: destination type.
    pub destination_type: String,
    /// Required: whether the configuration is enabled.
    pub enabled: Option<bool>,
    /// Required: configuration name.
    pub name: Option<String>,
    /// Optional: bearer token sent to the destination.
    pub token: Option<String>,
    /// Optional: run triggers.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Optional: destination URL (required unless the type is `email`).
    pub url: Option<String>,
}

/// Options for updating a configuration. Only supplied fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfigOptions {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub token: Option<String>,
    /// When supplied, replaces the whole trigger set.
    pub triggers: Option<Vec<String>>,
    pub url: Option<String>,
}

/// A notification configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub destination_type: Destination,
    pub enabled: bool,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub triggers: Vec<Trigger>,
    pub url: Option<String>,
    pub workspace_id: String,
}

impl NotificationConfig {
    /// Validate options and build a new configuration for a workspace.
    pub fn new(workspace_id: impl Into<String>, opts: CreateConfigOptions) -> Result<Self> {
        let destination_type = Destination::from_str(&opts.destination_type)?;
        if destination_type.requires_url() && opts.url.is_none() {
            return Err(Error::DestinationRequiresUrl);
        }
        if let Some(url) = &opts.url {
            validate_url(url)?;
        }
        if let Some(token) = &opts.token {
            validate_token(token)?;
        }
        let triggers = parse_triggers(&opts.triggers)?;
        let enabled = opts.enabled.ok_or(Error::MissingParameter("enabled"))?;
        let name = opts.name.ok_or(Error::MissingParameter("name"))?;
        if name.is_empty() {
            return Err(Error::validation("name cannot be an empty string"));
        }

        let now = Utc::now();
        Ok(Self {
            id: new_config_id(),
            created_at: now,
            updated_at: now,
            destination_type,
            enabled,
            name,
            token: opts.token,
            triggers,
            url: opts.url,
            workspace_id: workspace_id.into(),
        })
    }

    /// Merge the supplied fields into this configuration.
    ///
    /// Validation happens before any field is touched, so a failed update
    /// leaves the configuration unchanged.
    pub fn update(&mut self, opts: UpdateConfigOptions) -> Result<()> {
        if let Some(name) = &opts.name
            && name.is_empty()
        {
            return Err(Error::validation("name cannot be an empty string"));
        }
        let triggers = opts.triggers.as_deref().map(parse_triggers).transpose()?;
        if let Some(url) = &opts.url {
            validate_url(url)?;
        }
        if let Some(token) = &opts.token {
            validate_token(token)?;
        }

        if let Some(name) = opts.name {
            self.name = name;
        }
        if let Some(enabled) = opts.enabled {
            self.enabled = enabled;
        }
        if let Some(token) = opts.token {
            self.token = Some(token);
        }
        if let Some(triggers) = triggers {
            self.triggers = triggers;
        }
        if let Some(url) = opts.url {
            self.url = Some(url);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn has_trigger(&self, trigger: Trigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Trigger represented by `status`, if this configuration subscribes to it.
    pub fn match_trigger(&self, status: RunStatus) -> Option<Trigger> {
        match_trigger(status).filter(|t| self.has_trigger(*t))
    }

    /// Key under which the connection cache shares clients: the destination
    /// type followed by the URL.
    ///
    /// A chat webhook and a generic webhook at the same URL speak different
    /// payloads, so they never share a client. Configurations without a URL
    /// (only `email`) share by destination type.
    pub fn endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.destination_type,
            self.url.as_deref().unwrap_or_default()
        )
    }

    /// Rebuild a configuration from its stored row.
    pub fn from_db_model(model: &NotificationConfigDbModel) -> Result<Self> {
        let labels: Vec<String> = serde_json::from_str(&model.triggers)?;
        Ok(Self {
            id: model.id.clone(),
            created_at: ms_to_datetime(model.created_at),
            updated_at: ms_to_datetime(model.updated_at),
            destination_type: Destination::from_str(&model.destination_type)?,
            enabled: model.enabled,
            name: model.name.clone(),
            token: model.token.clone(),
            triggers: parse_triggers(&labels)?,
            url: model.url.clone(),
            workspace_id: model.workspace_id.clone(),
        })
    }

    pub fn to_db_model(&self) -> Result<NotificationConfigDbModel> {
        let labels: Vec<&str> = self.triggers.iter().map(Trigger::as_str).collect();
        Ok(NotificationConfigDbModel {
            id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            name: self.name.clone(),
            destination_type: self.destination_type.as_str().to_string(),
            enabled: self.enabled,
            token: self.token.clone(),
            triggers: serde_json::to_string(&labels)?,
            url: self.url.clone(),
            created_at: datetime_to_ms(self.created_at),
            updated_at: datetime_to_ms(self.updated_at),
        })
    }
}

impl fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("destination_type", &self.destination_type)
            .field("triggers", &self.triggers)
            .field("url", &self.url)
            .field("workspace_id", &self.workspace_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn new_config_id() -> String {
    format!("nc-{}", uuid::Uuid::new_v4().simple())
}

fn validate_url(raw: &str) -> Result<()> {
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|e| Error::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })
}

/// The token is sent as `Authorization: Bearer <token>`, so it must be a
/// valid header value.
fn validate_token(token: &str) -> Result<()> {
    reqwest::header::HeaderValue::from_str(&bearer(token))
        .map(|_| ())
        .map_err(|_| Error::validation("token contains characters not allowed in an HTTP header"))
}

pub(crate) fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Parse trigger labels into a de-duplicated set, keeping first occurrence order.
pub(crate) fn parse_triggers(raw: &[String]) -> Result<Vec<Trigger>> {
    let mut triggers = Vec::with_capacity(raw.len());
    for label in raw {
        let trigger = Trigger::from_str(label)?;
        if !triggers.contains(&trigger) {
            triggers.push(trigger);
        }
    }
    Ok(triggers)
}
