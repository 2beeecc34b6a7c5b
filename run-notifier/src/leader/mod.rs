//! Leader election.
//!
//! Only one notifier in a cluster may dispatch notifications, otherwise every
//! destination would receive duplicates. [`LeaderElection::run`] holds a
//! cluster-wide lease while the wrapped loop runs, and keeps competing for the
//! lease until cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::repositories::LeaseRepository;
use crate::domain::BackoffPolicy;

/// Lock id guaranteeing only one notifier runs in a cluster.
pub const NOTIFIER_LOCK_ID: i64 = 5_577_006_791_947_779_410;

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Lower bound for the renewal interval.
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one attempt to lead.
enum Tenure {
    /// Someone else holds the lease.
    Unavailable,
    /// The lease was held and the loop ran until it returned.
    Served { result: Result<()>, lost: bool },
}

/// Runs a loop only while holding a cluster-wide lease.
pub struct LeaderElection {
    leases: Arc<dyn LeaseRepository>,
    lock_id: i64,
    holder: String,
    ttl: Duration,
    backoff: BackoffPolicy,
}

impl LeaderElection {
    pub fn new(leases: Arc<dyn LeaseRepository>, lock_id: i64) -> Self {
        Self {
            leases,
            lock_id,
            holder: uuid::Uuid::new_v4().to_string(),
            ttl: DEFAULT_LEASE_TTL,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Identity of this process as a lease holder.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Repeatedly acquire the lease and run `f` while holding it.
    ///
    /// `f` receives a token that is cancelled when `token` is cancelled or the
    /// lease is lost; it should return promptly once that happens. Failures to
    /// acquire, errors from `f` and lost leases are logged and retried with
    /// backoff, which resets after every tenure. Returns `Ok` once `token` is
    /// cancelled.
    pub async fn run<F, Fut>(&self, token: CancellationToken, mut f: F) -> Result<()>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;

        while !token.is_cancelled() {
            match self.lead(&token, &mut f).await {
                Ok(Tenure::Unavailable) => {
                    debug!(lock_id = self.lock_id, "Leader lease held elsewhere");
                }
                Ok(Tenure::Served { result, lost }) => {
                    attempt = 0;
                    if token.is_cancelled() {
                        if let Err(e) = result {
                            warn!(lock_id = self.lock_id, error = %e, "Loop failed during shutdown");
                        }
                        break;
                    }
                    match result {
                        Err(e) => error!(lock_id = self.lock_id, error = %e, "Leader loop failed"),
                        Ok(()) if lost => warn!(lock_id = self.lock_id, "Leader lease lost"),
                        Ok(()) => info!(lock_id = self.lock_id, "Leader loop exited"),
                    }
                }
                Err(e) => {
                    warn!(lock_id = self.lock_id, error = %e, "Failed to acquire leader lease");
                }
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(lock_id = self.lock_id, "Leader election stopped");
        Ok(())
    }

    async fn lead<F, Fut>(&self, token: &CancellationToken, f: &mut F) -> Result<Tenure>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self
            .leases
            .try_acquire(self.lock_id, &self.holder, self.ttl)
            .await?
        {
            return Ok(Tenure::Unavailable);
        }
        info!(lock_id = self.lock_id, holder = %self.holder, "Acquired leader lease");

        let child = token.child_token();
        let heartbeat = tokio::spawn(heartbeat(
            Arc::clone(&self.leases),
            self.lock_id,
            self.holder.clone(),
            self.ttl,
            child.clone(),
        ));

        let result = f(child.clone()).await;
        child.cancel();
        let lost = matches!(heartbeat.await, Ok(true));

        if let Err(e) = self.leases.release(self.lock_id, &self.holder).await {
            warn!(lock_id = self.lock_id, error = %e, "Failed to release leader lease");
        } else {
            debug!(lock_id = self.lock_id, "Released leader lease");
        }

        Ok(Tenure::Served { result, lost })
    }
}

/// Renew the lease every third of its TTL until `token` is cancelled.
///
/// Returns `true` if the lease was lost, in which case `token` has been
/// cancelled.
async fn heartbeat(
    leases: Arc<dyn LeaseRepository>,
    lock_id: i64,
    holder: String,
    ttl: Duration,
    token: CancellationToken,
) -> bool {
    let mut interval = tokio::time::interval((ttl / 3).max(MIN_RENEW_INTERVAL));
    // The first tick completes immediately and the lease was just taken.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = interval.tick() => {
                match leases.renew(lock_id, &holder, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(lock_id, "Leader lease taken over by another holder");
                        token.cancel();
                        return true;
                    }
                    Err(e) => {
                        warn!(lock_id, error = %e, "Failed to renew leader lease");
                        token.cancel();
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::database::models::LeaderLeaseDbModel;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct MemoryLeaseRepository {
        leases: Mutex<HashMap<i64, (String, Instant)>>,
        renewals: AtomicUsize,
        fail_renew: AtomicBool,
    }

    #[async_trait]
    impl LeaseRepository for MemoryLeaseRepository {
        async fn try_acquire(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool> {
            let mut leases = self.leases.lock();
            let now = Instant::now();
            match leases.get(&lock_id) {
                Some((current, expires)) if current != holder && *expires > now => Ok(false),
                _ => {
                    leases.insert(lock_id, (holder.to_string(), now + ttl));
                    Ok(true)
                }
            }
        }

        async fn renew(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            if self.fail_renew.load(Ordering::SeqCst) {
                return Err(Error::Other("renew failed".to_string()));
            }
            let mut leases = self.leases.lock();
            match leases.get_mut(&lock_id) {
                Some((current, expires)) if current == holder => {
                    *expires = Instant::now() + ttl;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn release(&self, lock_id: i64, holder: &str) -> Result<()> {
            let mut leases = self.leases.lock();
            if leases.get(&lock_id).is_some_and(|(current, _)| current == holder) {
                leases.remove(&lock_id);
            }
            Ok(())
        }

        async fn get_lease(&self, lock_id: i64) -> Result<Option<LeaderLeaseDbModel>> {
            Ok(self
                .leases
                .lock()
                .get(&lock_id)
                .map(|(holder, _)| LeaderLeaseDbModel {
                    lock_id,
                    holder: holder.clone(),
                    expires_at: 0,
                }))
        }
    }

    fn fast_election(leases: Arc<MemoryLeaseRepository>) -> LeaderElection {
        LeaderElection::new(leases, NOTIFIER_LOCK_ID)
            .with_ttl(Duration::from_millis(90))
            .with_backoff(
                BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40))
                    .without_jitter(),
            )
    }

    #[tokio::test]
    async fn test_runs_loop_and_stops_on_cancellation() {
        let leases = Arc::new(MemoryLeaseRepository::default());
        let election = fast_election(leases.clone());
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                token.cancel();
            })
        };

        election
            .run(token.clone(), |child| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    child.cancelled().await;
                    Ok(())
                }
            })
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Renewed while running, released afterwards.
        assert!(leases.renewals.load(Ordering::SeqCst) >= 2);
        assert!(leases.get_lease(NOTIFIER_LOCK_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retries_after_loop_error() {
        let leases = Arc::new(MemoryLeaseRepository::default());
        let election = fast_election(leases);
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        election
            .run(token.clone(), |_child| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let token = token.clone();
                async move {
                    if n < 2 {
                        return Err(Error::internal("cache invariant violated"));
                    }
                    token.cancel();
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_waits_while_lease_held_elsewhere() {
        let leases = Arc::new(MemoryLeaseRepository::default());
        leases
            .try_acquire(NOTIFIER_LOCK_ID, "other-node", Duration::from_secs(60))
            .await
            .unwrap();

        let election = fast_election(leases.clone());
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            })
        };

        election
            .run(token, |_child| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let lease = leases.get_lease(NOTIFIER_LOCK_ID).await.unwrap().unwrap();
        assert_eq!(lease.holder, "other-node");
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_loop() {
        let leases = Arc::new(MemoryLeaseRepository::default());
        leases.fail_renew.store(true, Ordering::SeqCst);
        let election = fast_election(leases.clone());
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        election
            .run(token.clone(), |child| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let token = token.clone();
                let leases = leases.clone();
                async move {
                    if n == 0 {
                        // Cancelled by the failing heartbeat.
                        child.cancelled().await;
                        leases.fail_renew.store(false, Ordering::SeqCst);
                    } else {
                        token.cancel();
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let election = fast_election(Arc::new(MemoryLeaseRepository::default()));
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicUsize::new(0);

        election
            .run(token, |_child| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
