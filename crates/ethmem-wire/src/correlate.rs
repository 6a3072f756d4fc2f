//! Correlation-id pending table.
//!
//! A request registers its id, the response path resolves it, and the waiter
//! gives up after its own deadline. A timeout removes only that waiter's
//! entry; every other pending request is unaffected.

use crate::error::WireError;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Pending requests keyed by correlation id.
pub struct PendingTable<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    waiters: DashMap<K, oneshot::Sender<T>>,
}

impl<K, T> PendingTable<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Register a waiter for `key`. A previous waiter under the same key is dropped.
    pub fn register(&self, key: K) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(key.clone(), tx).is_some() {
            warn!(?key, "Correlation id reused; previous waiter dropped");
        }
        rx
    }

    /// Deliver `value` to the waiter for `key`. Returns false when nobody is
    /// waiting (already resolved, timed out, or never registered).
    pub fn resolve(&self, key: &K, value: T) -> bool {
        match self.waiters.remove(key) {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => {
                debug!(?key, "No pending waiter for response");
                false
            }
        }
    }

    /// Whether a waiter is registered for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.waiters.contains_key(key)
    }

    /// Forget a waiter without resolving it.
    pub fn discard(&self, key: &K) {
        self.waiters.remove(key);
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no waiters are outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Reject every outstanding waiter by dropping its sender.
    pub fn clear(&self) {
        self.waiters.clear();
    }

    /// Await `rx` for at most `timeout`. On expiry the id is discarded.
    pub async fn wait(
        &self,
        key: &K,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
        operation: &str,
    ) -> Result<T, WireError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.discard(key);
                Err(WireError::ConnectionClosed)
            }
            Err(_) => {
                self.discard(key);
                warn!(?key, operation, secs = timeout.as_secs(), "Pending request timed out");
                Err(WireError::Timeout {
                    operation: operation.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

impl<K, T> Default for PendingTable<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic correlation-id source.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    /// Start counting at 1.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Next unused id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
