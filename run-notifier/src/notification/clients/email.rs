//! Email destination.
//!
//! Email configurations are accepted so that API clients which create them
//! keep working, but nothing is ever sent.

use async_trait::async_trait;

use super::DestinationClient;
use crate::Result;
use crate::notification::config::Destination;
use crate::notification::payload::Notification;

/// No-op client for the email destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailClient;

#[async_trait]
impl DestinationClient for EmailClient {
    fn destination(&self) -> Destination {
        Destination::Email
    }

    async fn publish(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
