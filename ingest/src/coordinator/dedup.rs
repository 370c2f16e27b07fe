//! Optional duplicate suppression across ingestion calls.
//!
//! Off by default: at-least-once delivery already tolerates duplicates, and
//! downstream consumers are expected to be idempotent on the transaction id.
//! When enabled, the window remembers ids whose ingestion completed with an
//! acceptance. A later call carrying one of those ids inside the window is
//! answered without publishing again.
//!
//! Only completed acceptances are remembered. Two concurrent calls with the
//! same id both publish.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Every call publishes.
    Disabled,
    /// Remember accepted ids for `ttl`, at most `capacity` of them.
    Window { ttl: Duration, capacity: usize },
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Time-bounded set of recently accepted ids.
pub struct DedupWindow {
    ttl: Duration,
    capacity: usize,
    seen: DashMap<TransactionId, Instant>,
}

impl DedupWindow {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            seen: DashMap::new(),
        }
    }

    /// `None` when the policy disables dedup.
    pub fn from_policy(policy: DedupPolicy) -> Option<Self> {
        match policy {
            DedupPolicy::Disabled => None,
            DedupPolicy::Window { ttl, capacity } => Some(Self::new(ttl, capacity)),
        }
    }

    /// Whether `id` was accepted inside the window.
    pub fn contains(&self, id: &TransactionId) -> bool {
        let fresh = self.seen.get(id).map(|at| at.elapsed() < self.ttl);
        match fresh {
            Some(true) => true,
            Some(false) => {
                self.seen.remove_if(id, |_, at| at.elapsed() >= self.ttl);
                false
            }
            None => false,
        }
    }

    /// Records a completed acceptance.
    pub fn remember(&self, id: TransactionId) {
        if self.seen.len() >= self.capacity && !self.seen.contains_key(&id) {
            self.evict();
        }
        self.seen.insert(id, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&self) {
        self.seen.retain(|_, at| at.elapsed() < self.ttl);
        if self.seen.len() < self.capacity {
            return;
        }
        let oldest = self
            .seen
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(id) = oldest {
            debug!(%id, "dedup window full; evicting oldest id");
            self.seen.remove(&id);
        }
    }
}
