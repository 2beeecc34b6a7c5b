//! Slack-style chat webhook client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::json;

use super::DestinationClient;
use super::webhook::JsonPoster;
use crate::Result;
use crate::notification::config::Destination;
use crate::notification::payload::Notification;

/// Client posting `{"text": "<summary>"}` to a chat incoming-webhook URL.
pub struct SlackClient {
    poster: JsonPoster,
}

impl SlackClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            poster: JsonPoster::new(Destination::Slack, url, timeout)?,
        })
    }

    fn build_payload(notification: &Notification) -> serde_json::Value {
        json!({ "text": notification.summary() })
    }
}

#[async_trait]
impl DestinationClient for SlackClient {
    fn destination(&self) -> Destination {
        Destination::Slack
    }

    async fn publish(&self, notification: &Notification) -> Result<()> {
        self.poster
            .post(&Self::build_payload(notification), HeaderMap::new())
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
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_payload_has_only_text() {
        let notification = test_notification(RunStatus::Planned, Trigger::NeedsAttention);
        let payload = SlackClient::build_payload(&notification);

        let object = payload.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(payload["text"], notification.summary());
    }

    #[tokio::test]
    async fn test_publish_posts_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let notification = test_notification(RunStatus::Applied, Trigger::Completed);
        client.publish(&notification).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, json!({ "text": notification.summary() }));
        assert!(requests[0].headers.get("authorization").is_none());
    }
}
