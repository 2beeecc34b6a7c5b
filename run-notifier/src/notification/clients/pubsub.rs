//! Google Cloud pub/sub client.
//!
//! Configuration URLs take the form `gcppubsub://<project-id>/<topic>`.
//! Messages are published through the pub/sub REST API; each notification
//! becomes one message whose data is the JSON-encoded generic payload.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::DestinationClient;
use crate::notification::config::Destination;
use crate::notification::payload::{Notification, PAYLOAD_VERSION};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// URL scheme identifying pub/sub destinations.
pub const PUBSUB_SCHEME: &str = "gcppubsub";

/// Production pub/sub REST endpoint.
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

static PROJECT_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][-a-z0-9]{4,28}[a-z0-9]$").expect("valid project id regex")
});

static TOPIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][-a-zA-Z0-9]{2,254}$").expect("valid topic regex")
});

/// How the client authenticates against the pub/sub API.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum PubSubCredentials {
    /// No authentication, e.g. when talking to the emulator.
    None,
    /// A fixed OAuth2 access token.
    AccessToken(String),
    /// Tokens fetched from the GCE metadata server.
    #[default]
    MetadataServer,
}

impl std::fmt::Debug for PubSubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::AccessToken(_) => write!(f, "AccessToken(<redacted>)"),
            Self::MetadataServer => write!(f, "MetadataServer"),
        }
    }
}

/// Connection settings for pub/sub clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubSettings {
    /// Base URL of the REST API.
    pub endpoint: String,
    pub credentials: PubSubCredentials,
}

impl PubSubSettings {
    /// Settings for a local pub/sub emulator listening on `host` (`host:port`).
    pub fn emulator(host: &str) -> Self {
        Self {
            endpoint: format!("http://{}", host),
            credentials: PubSubCredentials::None,
        }
    }
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            credentials: PubSubCredentials::MetadataServer,
        }
    }
}

/// A validated `project/topic` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    pub project: String,
    pub topic: String,
}

impl TopicName {
    /// Parse and validate a `gcppubsub://<project-id>/<topic>` URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).map_err(|e| Error::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != PUBSUB_SCHEME {
            return Err(Error::InvalidScheme(url.scheme().to_string()));
        }

        let project = url.host_str().unwrap_or_default();
        if !PROJECT_ID_REGEX.is_match(project) {
            return Err(Error::InvalidProjectId(project.to_string()));
        }

        let topic = url.path().strip_prefix('/').unwrap_or(url.path());
        if topic.is_empty() || !TOPIC_REGEX.is_match(topic) {
            return Err(Error::InvalidTopic(topic.to_string()));
        }

        Ok(Self {
            project: project.to_string(),
            topic: topic.to_string(),
        })
    }

    /// Fully-qualified resource name, `projects/<p>/topics/<t>`.
    pub fn resource(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: [PubSubMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PubSubMessage<'a> {
    data: String,
    attributes: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Client publishing to a single pub/sub topic.
pub struct PubSubClient {
    topic: TopicName,
    publish_url: String,
    credentials: PubSubCredentials,
    client: RwLock<Option<Client>>,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl PubSubClient {
    pub fn new(url: &str, settings: PubSubSettings, timeout: Duration) -> Result<Self> {
        let topic = TopicName::parse(url)?;
        let publish_url = format!(
            "{}/v1/{}:publish",
            settings.endpoint.trim_end_matches('/'),
            topic.resource()
        );
        Ok(Self {
            topic,
            publish_url,
            credentials: settings.credentials,
            client: RwLock::new(Some(build_client(timeout)?)),
            cached_token: Mutex::new(None),
        })
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    async fn access_token(&self, client: &Client) -> Result<Option<String>> {
        match &self.credentials {
            PubSubCredentials::None => Ok(None),
            PubSubCredentials::AccessToken(token) => Ok(Some(token.clone())),
            PubSubCredentials::MetadataServer => {
                let mut cached = self.cached_token.lock().await;
                if let Some((token, expires_at)) = cached.as_ref()
                    && Instant::now() + TOKEN_REFRESH_MARGIN < *expires_at
                {
                    return Ok(Some(token.clone()));
                }

                let token: MetadataToken = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
                *cached = Some((token.access_token.clone(), expires_at));
                debug!(topic = %self.topic.resource(), "Refreshed pub/sub access token");
                Ok(Some(token.access_token))
            }
        }
    }

    fn build_request<'a>(
        notification: &'a Notification,
        data: &[u8],
        version: &'a str,
    ) -> PublishRequest<'a> {
        let attributes = HashMap::from([
            ("payload_version", version),
            ("notification_configuration_id", notification.config.id.as_str()),
            ("run_id", notification.event.run_id.as_str()),
            ("trigger", notification.trigger.as_str()),
        ]);
        PublishRequest {
            messages: [PubSubMessage {
                data: BASE64.encode(data),
                attributes,
            }],
        }
    }
}

#[async_trait]
impl DestinationClient for PubSubClient {
    fn destination(&self) -> Destination {
        Destination::GcpPubSub
    }

    async fn publish(&self, notification: &Notification) -> Result<()> {
        let client = self.client.read().clone().ok_or(Error::ClientClosed)?;

        let data = serde_json::to_vec(&notification.generic_payload())?;
        let version = PAYLOAD_VERSION.to_string();
        let body = Self::build_request(notification, &data, &version);

        let token = self
            .access_token(&client)
            .await
            .map_err(|e| Error::delivery(Destination::GcpPubSub.as_str(), e.to_string()))?;

        let mut request = client.post(&self.publish_url).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::delivery(Destination::GcpPubSub.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(topic = %self.topic.resource(), %status, "Pub/sub publish rejected");
            return Err(Error::delivery(
                Destination::GcpPubSub.as_str(),
                format!("{} - {}", status, body),
            ));
        }

        let published: PublishResponse = response.json().await.unwrap_or_default();
        debug!(
            topic = %self.topic.resource(),
            message_ids = ?published.message_ids,
            "Published pub/sub message"
        );
        Ok(())
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            debug!(topic = %self.topic.resource(), "Closed pub/sub client");
        }
    }
}
