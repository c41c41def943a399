//! The coalescing notifier and its flush task.

use crate::{DEFAULT_FLUSH_INTERVAL, SUBSCRIBER_CHANNEL_CAPACITY};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Errors from notification operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The notifier is shutting down; re-subscribe after reconnecting.
    #[error("notifier shutting down")]
    ShuttingDown,
}

struct Inner {
    /// Ids accumulated since the last flush, deduplicated by value.
    pending: Mutex<Vec<u64>>,
    /// Flushed batches fan out through this channel.
    batches: broadcast::Sender<Arc<Vec<u64>>>,
    /// Becomes true exactly once, on shutdown.
    shutdown: watch::Sender<bool>,
}

/// Coalescing scope-change notifier.
///
/// Cloning is cheap; all clones share the queue and the flush task. The
/// flush task exits when [`ScopeNotifier::shutdown`] is called.
#[derive(Clone)]
pub struct ScopeNotifier {
    inner: Arc<Inner>,
}

impl ScopeNotifier {
    /// Create a notifier flushing at the default 1-second tick.
    #[must_use]
    pub fn new() -> Self {
        Self::with_flush_interval(DEFAULT_FLUSH_INTERVAL)
    }

    /// Create a notifier with a custom flush tick (shortened in tests).
    #[must_use]
    pub fn with_flush_interval(interval: Duration) -> Self {
        let (batch_tx, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            pending: Mutex::new(Vec::new()),
            batches: batch_tx,
            shutdown: shutdown_tx,
        });

        let flusher = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let batch = std::mem::take(&mut *flusher.pending.lock());
                        if batch.is_empty() {
                            continue;
                        }
                        let receivers = flusher.batches.send(Arc::new(batch)).unwrap_or(0);
                        trace!(receivers, "Notification batch flushed");
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Notifier flush task stopping");
                        break;
                    }
                }
            }
        });

        Self { inner }
    }

    /// Enqueue a scope-change event.
    ///
    /// Duplicates within the current flush window are dropped. Sends after
    /// shutdown are silently ignored; the catalog live set carries the
    /// truth for re-subscribing callers.
    pub fn send(&self, id: u64) {
        if *self.inner.shutdown.borrow() {
            debug!(id, "Notification dropped, notifier shut down");
            return;
        }
        let mut pending = self.inner.pending.lock();
        if !pending.contains(&id) {
            pending.push(id);
        }
    }

    /// Block until the next flush and return the accumulated batch.
    ///
    /// Returns [`NotifyError::ShuttingDown`] once shutdown has begun, which
    /// also releases every already-parked subscriber.
    pub async fn recv(&self) -> Result<Vec<u64>, NotifyError> {
        if *self.inner.shutdown.borrow() {
            return Err(NotifyError::ShuttingDown);
        }
        let mut rx = self.inner.batches.subscribe();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        loop {
            tokio::select! {
                batch = rx.recv() => match batch {
                    Ok(ids) => return Ok(ids.as_ref().clone()),
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(NotifyError::ShuttingDown);
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(lagged = count, "Subscriber lagged, batches dropped");
                        continue;
                    }
                },
                _ = shutdown_rx.changed() => return Err(NotifyError::ShuttingDown),
            }
        }
    }

    /// Stop the flush task and release every parked subscriber.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Number of currently parked subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.batches.receiver_count()
    }
}

impl Default for ScopeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const FAST_FLUSH: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_send_then_recv_batch() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        let waiter = {
            let n = notifier.clone();
            tokio::spawn(async move { n.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        notifier.send(42);
        notifier.send(7);

        let batch = timeout(WAIT, waiter)
            .await
            .expect("flush timed out")
            .expect("join")
            .expect("batch");
        assert!(batch.contains(&42));
        assert!(batch.contains(&7));
    }

    #[tokio::test]
    async fn test_duplicates_coalesced() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        let waiter = {
            let n = notifier.clone();
            tokio::spawn(async move { n.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        notifier.send(9);
        notifier.send(9);
        notifier.send(9);

        let batch = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(batch, vec![9]);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_flush() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let n = notifier.clone();
            waiters.push(tokio::spawn(async move { n.recv().await }));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        notifier.send(1);

        for waiter in waiters {
            let batch = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
            assert_eq!(batch, vec![1]);
        }
    }

    #[tokio::test]
    async fn test_shutdown_releases_parked_subscriber() {
        let notifier = ScopeNotifier::with_flush_interval(Duration::from_secs(3600));
        let waiter = {
            let n = notifier.clone();
            tokio::spawn(async move { n.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        notifier.shutdown();

        let result = timeout(WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(NotifyError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_recv_after_shutdown_fails_fast() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        notifier.shutdown();
        assert_eq!(notifier.recv().await, Err(NotifyError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_ignored() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        notifier.shutdown();
        notifier.send(5);
        assert_eq!(notifier.recv().await, Err(NotifyError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_reserved_zero_id_passes_through() {
        let notifier = ScopeNotifier::with_flush_interval(FAST_FLUSH);
        let waiter = {
            let n = notifier.clone();
            tokio::spawn(async move { n.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        notifier.send(0);

        let batch = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(batch, vec![0]);
    }
}
