//! # Broker Boundary
//!
//! The outbound edge of the ingestion core. The publisher talks to the event
//! bus exclusively through [`BrokerConnector`] (scoped session acquisition)
//! and [`BrokerSession`] (sends, flush, close). Concrete wire protocols live
//! behind these traits; this crate ships an in-process implementation in
//! [`memory`].
//!
//! ## Partitioning
//!
//! Every message carries a key. Brokers route a key to a partition with
//! [`partition_for`], so all messages sharing a key (every retry and every
//! duplicate of one transaction) land in the same ordered stream.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{InMemoryBroker, StoredMessage};

// ---------------------------------------------------------------------------
// Messages & Receipts
// ---------------------------------------------------------------------------

/// One keyed message bound for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: Bytes,
    pub payload: Bytes,
}

/// What the broker tells us after accepting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Durably written; the offset is final.
    Acknowledged { partition: u32, offset: u64 },
    /// Accepted into the send buffer; durability not yet confirmed.
    Queued { partition: u32 },
}

/// Whether a send waits for the broker's durability acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Wait for the partition leader to confirm the write.
    Leader,
    /// Return as soon as the broker buffers the message.
    None,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a broker session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The partition leader is unreachable (election in progress, node down).
    #[error("leader for partition {partition} is unavailable")]
    LeaderUnavailable { partition: u32 },

    /// The broker did not answer in time.
    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    /// The connection dropped.
    #[error("broker connection lost: {0}")]
    Disconnected(String),

    /// The payload exceeds the broker's message size limit.
    #[error("message of {size} bytes exceeds broker limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// The message could not be encoded for the wire.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The topic does not exist on this broker.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    /// The session was closed locally.
    #[error("broker session is closed")]
    Closed,
}

impl BrokerError {
    /// Transient failures that may succeed if the same message is sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LeaderUnavailable { .. } | Self::Timeout(_) | Self::Disconnected(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Session Traits
// ---------------------------------------------------------------------------

/// A live, shareable connection to the event bus.
///
/// Implementations must tolerate concurrent `send` calls from many tasks.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Hands one message to the broker.
    async fn send(&self, message: BrokerMessage, ack: AckMode) -> Result<DeliveryReceipt, BrokerError>;

    /// Pushes out anything buffered client-side. Callers bound this with a
    /// timeout.
    async fn flush(&self) -> Result<(), BrokerError>;

    /// Orderly close. Subsequent sends fail with [`BrokerError::Closed`].
    async fn close(&self);

    /// Immediate, synchronous teardown for abnormal exit paths.
    fn abort(&self);
}

/// Opens sessions. Called once at startup.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError>;
}

/// Maps a message key to a partition in `0..partitions`.
///
/// Stable across processes and restarts: the mapping depends only on the key
/// bytes and the partition count.
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    if partitions == 0 {
        return 0;
    }
    let hash = blake3::hash(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % u64::from(partitions)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_for_a_key() {
        let first = partition_for(b"t1", 8);
        for _ in 0..16 {
            assert_eq!(partition_for(b"t1", 8), first);
        }
    }

    #[test]
    fn partition_is_in_range() {
        for i in 0..500u32 {
            let key = format!("tx-{i}");
            assert!(partition_for(key.as_bytes(), 7) < 7);
        }
    }

    #[test]
    fn keys_spread_across_partitions() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..200u32 {
            seen.insert(partition_for(format!("k{i}").as_bytes(), 4));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn single_partition_always_zero() {
        assert_eq!(partition_for(b"anything", 1), 0);
        assert_eq!(partition_for(b"anything", 0), 0);
    }

    #[test]
    fn retryable_classification() {
        assert!(BrokerError::LeaderUnavailable { partition: 0 }.is_retryable());
        assert!(BrokerError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(BrokerError::Disconnected("reset".into()).is_retryable());
        assert!(!BrokerError::MessageTooLarge { size: 2, max: 1 }.is_retryable());
        assert!(!BrokerError::Serialization("bad".into()).is_retryable());
        assert!(!BrokerError::UnknownTopic("x".into()).is_retryable());
        assert!(!BrokerError::Closed.is_retryable());
    }
}
