//! Relay of configuration changes made by other replicas.
//!
//! Every replica writes its configuration changes to the shared outbox and
//! announces them locally. The relay follows the outbox and republishes the
//! changes written by *other* replicas on this replica's broadcaster, so a
//! notifier elected here sees every change in the cluster.
//!
//! The cursor starts at the end of the outbox: changes made before the relay
//! was primed are already reflected in the store the notifier loads from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ConfigEvent, ConfigEventBroadcaster};
use crate::Result;
use crate::database::repositories::ConfigOutboxRepository;
use crate::database::time::now_ms;

/// Default delay between outbox polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Entries fetched per query.
const BATCH_SIZE: i64 = 100;

/// Age after which outbox entries are pruned.
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct ConfigEventRelay {
    outbox: Arc<dyn ConfigOutboxRepository>,
    origin: String,
    events: ConfigEventBroadcaster,
    poll_interval: Duration,
    /// Last sequence number handled; `None` until primed.
    cursor: Mutex<Option<i64>>,
}

impl ConfigEventRelay {
    /// Create a relay skipping changes written under `origin`.
    pub fn new(
        outbox: Arc<dyn ConfigOutboxRepository>,
        origin: impl Into<String>,
        events: ConfigEventBroadcaster,
    ) -> Self {
        Self {
            outbox,
            origin: origin.into(),
            events,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cursor: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Position the cursor at the end of the outbox, unless already primed.
    pub async fn prime(&self) -> Result<()> {
        let mut cursor = self.cursor.lock().await;
        if cursor.is_none() {
            let seq = self.outbox.latest_seq().await?;
            debug!(seq, "Configuration relay primed");
            *cursor = Some(seq);
        }
        Ok(())
    }

    /// Republish every foreign change past the cursor.
    ///
    /// Returns the number of events published. An unprimed relay is primed
    /// instead. Undecodable entries are logged and skipped.
    pub async fn relay_once(&self) -> Result<usize> {
        let mut cursor = self.cursor.lock().await;
        let Some(mut seq) = *cursor else {
            *cursor = Some(self.outbox.latest_seq().await?);
            return Ok(0);
        };

        let mut relayed = 0;
        loop {
            let entries = self.outbox.fetch_after(seq, BATCH_SIZE).await?;
            let exhausted = (entries.len() as i64) < BATCH_SIZE;

            for entry in entries {
                seq = entry.seq;
                *cursor = Some(seq);
                if entry.origin == self.origin {
                    continue;
                }
                match serde_json::from_str::<ConfigEvent>(&entry.payload) {
                    Ok(event) => {
                        debug!(
                            seq,
                            origin = %entry.origin,
                            config_id = %event.config().id,
                            "Relaying {} configuration change",
                            event.kind()
                        );
                        self.events.publish(event);
                        relayed += 1;
                    }
                    Err(e) => {
                        warn!(
                            seq,
                            origin = %entry.origin,
                            error = %e,
                            "Invalid configuration outbox payload"
                        );
                    }
                }
            }

            if exhausted {
                break;
            }
        }
        Ok(relayed)
    }

    /// Delete outbox entries past retention.
    pub async fn prune(&self) -> Result<u64> {
        let cutoff = now_ms() - RETENTION.as_millis() as i64;
        let pruned = self.outbox.prune_before(cutoff).await?;
        if pruned > 0 {
            debug!(pruned, "Pruned configuration outbox");
        }
        Ok(pruned)
    }

    /// Poll the outbox until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        if let Err(e) = self.prime().await {
            warn!(error = %e, "Failed to prime configuration relay");
        }
        info!(
            origin = %self.origin,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Configuration relay started"
        );

        let mut last_prune = Instant::now();
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Err(e) = self.relay_once().await {
                warn!(error = %e, "Configuration relay poll failed");
            }

            if last_prune.elapsed() >= PRUNE_INTERVAL {
                last_prune = Instant::now();
                if let Err(e) = self.prune().await {
                    warn!(error = %e, "Failed to prune configuration outbox");
                }
            }
        }
        debug!("Configuration relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::config_outbox::tests::MemoryConfigOutbox;
    use crate::notification::cache::tests::test_config;
    use crate::notification::config::Destination;

    fn relay(outbox: &Arc<MemoryConfigOutbox>) -> (ConfigEventRelay, ConfigEventBroadcaster) {
        let events = ConfigEventBroadcaster::new();
        let relay = ConfigEventRelay::new(outbox.clone(), "self", events.clone())
            .with_poll_interval(Duration::from_millis(10));
        (relay, events)
    }

    fn created(url: &str) -> ConfigEvent {
        ConfigEvent::Created(test_config("ws-1", Destination::Generic, url, &[]))
    }

    #[tokio::test]
    async fn test_relays_only_foreign_changes() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, events) = relay(&outbox);
        let mut rx = events.subscribe();
        relay.prime().await.unwrap();

        let own = created("http://a.example.com");
        let foreign = created("http://b.example.com");
        outbox.push_event("self", &own);
        outbox.push_event("other", &foreign);

        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), foreign);
        assert!(rx.try_recv().is_err());

        // Nothing new.
        assert_eq!(relay.relay_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_priming_skips_existing_entries() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        outbox.push_event("other", &created("http://old.example.com"));
        let (relay, events) = relay(&outbox);
        let mut rx = events.subscribe();

        // The first call primes instead of relaying.
        assert_eq!(relay.relay_once().await.unwrap(), 0);
        relay.prime().await.unwrap();

        let fresh = created("http://new.example.com");
        outbox.push_event("other", &fresh);
        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_skipped() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, events) = relay(&outbox);
        let mut rx = events.subscribe();
        relay.prime().await.unwrap();

        let valid = created("http://a.example.com");
        outbox.push("other", "{not json", now_ms());
        outbox.push_event("other", &valid);

        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), valid);
        assert_eq!(relay.relay_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_past_a_full_batch() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, events) = relay(&outbox);
        let mut rx = events.subscribe();
        relay.prime().await.unwrap();

        let count = BATCH_SIZE as usize + 5;
        for i in 0..count {
            outbox.push_event("other", &created(&format!("http://{i}.example.com")));
        }

        assert_eq!(relay.relay_once().await.unwrap(), count);
        for _ in 0..count {
            rx.recv().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cursor() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, events) = relay(&outbox);
        let mut rx = events.subscribe();
        relay.prime().await.unwrap();

        let event = created("http://a.example.com");
        outbox.push_event("other", &event);
        *outbox.fail_fetch.lock() = Some("database locked".to_string());
        assert!(relay.relay_once().await.is_err());

        *outbox.fail_fetch.lock() = None;
        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_prune_drops_expired_entries() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, _events) = relay(&outbox);

        let expired = now_ms() - RETENTION.as_millis() as i64 - 1_000;
        outbox.push("other", "{}", expired);
        outbox.push_event("other", &created("http://a.example.com"));

        assert_eq!(relay.prune().await.unwrap(), 1);
        assert_eq!(outbox.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_run_relays_until_cancelled() {
        let outbox = Arc::new(MemoryConfigOutbox::default());
        let (relay, events) = relay(&outbox);
        let relay = Arc::new(relay);
        let mut rx = events.subscribe();

        let token = CancellationToken::new();
        let handle = {
            let relay = relay.clone();
            let token = token.clone();
            tokio::spawn(async move { relay.run(token).await })
        };

        // Wait for the loop to prime on the empty outbox.
        for _ in 0..100 {
            if relay.cursor.lock().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let event = created("http://a.example.com");
        outbox.push_event("other", &event);
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, event);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
