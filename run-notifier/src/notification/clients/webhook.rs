//! Generic webhook client.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use super::DestinationClient;
use crate::notification::config::{Destination, bearer};
use crate::notification::payload::Notification;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// JSON-over-HTTP poster shared by the webhook-style clients.
///
/// Only transport failures are errors: the destination's response body is
/// discarded and a non-success status is logged.
pub(super) struct JsonPoster {
    destination: Destination,
    url: String,
    client: RwLock<Option<Client>>,
}

impl JsonPoster {
    pub(super) fn new(destination: Destination, url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            destination,
            url: url.to_string(),
            client: RwLock::new(Some(build_client(timeout)?)),
        })
    }

    pub(super) async fn post<T: Serialize + ?Sized>(
        &self,
        body: &T,
        headers: HeaderMap,
    ) -> Result<()> {
        // Clone the handle so the lock is not held across the request.
        let client = self.client.read().clone().ok_or(Error::ClientClosed)?;

        let response = client
            .post(&self.url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::delivery(self.destination.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                destination = %self.destination,
                url = %self.url,
                %status,
                "Webhook responded with non-success status"
            );
        }
        debug!(destination = %self.destination, url = %self.url, %status, "Webhook delivered");
        Ok(())
    }

    pub(super) fn close(&self) {
        if self.client.write().take().is_some() {
            debug!(destination = %self.destination, url = %self.url, "Closed webhook client");
        }
    }

    #[cfg(test)]
    pub(super) fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }
}

/// Client posting the versioned generic payload to a webhook.
///
/// The client is shared by every configuration at its URL, so the bearer
/// token is taken from the notification's configuration on each request.
pub struct WebhookClient {
    poster: JsonPoster,
}

impl WebhookClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            poster: JsonPoster::new(Destination::Generic, url, timeout)?,
        })
    }

    fn build_headers(notification: &Notification) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(token) = &notification.config.token else {
            return headers;
        };
        match HeaderValue::from_str(&bearer(token)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!(
                config_id = %notification.config.id,
                "Token is not a valid header value, sending without authorization"
            ),
        }
        headers
    }
}

#[async_trait]
impl DestinationClient for WebhookClient {
    fn destination(&self) -> Destination {
        Destination::Generic
    }

    async fn publish(&self, notification: &Notification) -> Result<()> {
        self.poster
            .post(
                &notification.generic_payload(),
                Self::build_headers(notification),
            )
            .await
    }

    async fn close(&self) {
        self.poster.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;
    use crate::notification::config::Trigger;
    use crate::notification::payload::tests::test_notification;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_publish_posts_generic_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            WebhookClient::new(&format!("{}/hook", server.uri()), Duration::from_secs(5)).unwrap();
        let mut notification = test_notification(RunStatus::Applying, Trigger::Applying);
        notification.config.token = Some("t0ken".to_string());
        client.publish(&notification).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["payload_version"], 1);
        assert_eq!(body["run_id"], "run-abc");
        assert_eq!(body["notifications"][0]["trigger"], "run:applying");
    }

    #[tokio::test]
    async fn test_shared_client_sends_each_configs_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = WebhookClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let mut first = test_notification(RunStatus::Applied, Trigger::Completed);
        first.config.id = "nc-1".to_string();
        first.config.token = Some("token-one".to_string());
        let mut second = first.clone();
        second.config.id = "nc-2".to_string();
        second.config.token = Some("token-two".to_string());
        let mut anonymous = first.clone();
        anonymous.config.id = "nc-3".to_string();
        anonymous.config.token = None;

        for notification in [&first, &second, &anonymous] {
            client.publish(notification).await.unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        let auth: Vec<Option<&str>> = requests
            .iter()
            .map(|r| r.headers.get("authorization").and_then(|v| v.to_str().ok()))
            .collect();
        assert_eq!(
            auth,
            vec![Some("Bearer token-one"), Some("Bearer token-two"), None]
        );
    }

    #[tokio::test]
    async fn test_unusable_token_is_sent_without_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Rows written before token validation existed can still hold these.
        let client = WebhookClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let mut notification = test_notification(RunStatus::Errored, Trigger::Errored);
        notification.config.token = Some("line\nbreak".to_string());
        client.publish(&notification).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = WebhookClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let notification = test_notification(RunStatus::Planning, Trigger::Planning);
        assert!(client.publish(&notification).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        // Nothing listens on port 9 (discard) on test hosts.
        let client =
            WebhookClient::new("http://127.0.0.1:9/hook", Duration::from_secs(2)).unwrap();
        let notification = test_notification(RunStatus::Planning, Trigger::Planning);

        let err = client.publish(&notification).await.unwrap_err();
        assert!(matches!(err, Error::Delivery { destination: "generic", .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let client =
            WebhookClient::new("https://example.com/hook", Duration::from_secs(5)).unwrap();
        client.close().await;
        client.close().await;
        assert!(client.poster.is_closed());

        let notification = test_notification(RunStatus::Planning, Trigger::Planning);
        assert!(matches!(
            client.publish(&notification).await,
            Err(Error::ClientClosed)
        ));
    }
}
