//! In-process broker.
//!
//! A single topic split into N partitions, each an append-only log with
//! monotonically increasing offsets. Backs the node's `memory://` mode and
//! every test in this workspace.
//!
//! Faults can be injected at runtime:
//!
//! - [`InMemoryBroker::set_available`] takes every partition leader down
//!   (sends fail with `LeaderUnavailable`, new connections are refused).
//! - [`InMemoryBroker::fail_next`] scripts the outcome of the next sends.
//! - [`InMemoryBroker::set_ack_latency`] delays leader acknowledgments.
//!
//! With `AckMode::Leader` the message is appended only after the ack latency
//! has elapsed, so a send abandoned mid-wait leaves nothing behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    partition_for, AckMode, BrokerConnector, BrokerError, BrokerMessage, BrokerSession,
    DeliveryReceipt,
};

/// A message as stored in a partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub partition: u32,
    pub offset: u64,
    pub key: Bytes,
    pub payload: Bytes,
    pub appended_at: DateTime<Utc>,
}

struct BrokerState {
    name: String,
    topic: String,
    partitions: Vec<Mutex<Vec<StoredMessage>>>,
    available: AtomicBool,
    scripted: Mutex<VecDeque<BrokerError>>,
    ack_latency: Mutex<Duration>,
    send_attempts: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_aborted: AtomicU64,
}

impl BrokerState {
    fn append(&self, partition: u32, message: BrokerMessage) -> u64 {
        let mut log = self.partitions[partition as usize].lock();
        let offset = log.len() as u64;
        log.push(StoredMessage {
            partition,
            offset,
            key: message.key,
            payload: message.payload,
            appended_at: Utc::now(),
        });
        offset
    }
}

/// Handle to an in-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Creates a broker named `name` serving `topic` with `partitions`
    /// partitions (at least one).
    pub fn new(name: impl Into<String>, topic: impl Into<String>, partitions: u32) -> Self {
        let partitions = partitions.max(1);
        Self {
            state: Arc::new(BrokerState {
                name: name.into(),
                topic: topic.into(),
                partitions: (0..partitions).map(|_| Mutex::new(Vec::new())).collect(),
                available: AtomicBool::new(true),
                scripted: Mutex::new(VecDeque::new()),
                ack_latency: Mutex::new(Duration::ZERO),
                send_attempts: AtomicU64::new(0),
                sessions_opened: AtomicU64::new(0),
                sessions_closed: AtomicU64::new(0),
                sessions_aborted: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn topic(&self) -> &str {
        &self.state.topic
    }

    pub fn partition_count(&self) -> u32 {
        self.state.partitions.len() as u32
    }

    /// Partition a key routes to on this broker.
    pub fn partition_of(&self, key: &[u8]) -> u32 {
        partition_for(key, self.partition_count())
    }

    /// Brings every partition leader up or down.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        info!(broker = %self.state.name, available, "broker availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Scripts the outcome of the next sends, in order. Scripted failures
    /// take precedence over the availability flag.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.state.scripted.lock().extend(errors);
    }

    /// Delay applied before a leader acknowledgment.
    pub fn set_ack_latency(&self, latency: Duration) {
        *self.state.ack_latency.lock() = latency;
    }

    /// Every stored message, partition by partition, in offset order.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.state
            .partitions
            .iter()
            .flat_map(|log| log.lock().clone())
            .collect()
    }

    /// Messages stored in one partition, in offset order.
    pub fn partition_messages(&self, partition: u32) -> Vec<StoredMessage> {
        self.state
            .partitions
            .get(partition as usize)
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Messages stored under `key`, in offset order.
    pub fn messages_for_key(&self, key: &[u8]) -> Vec<StoredMessage> {
        self.partition_messages(self.partition_of(key))
            .into_iter()
            .filter(|m| m.key.as_ref() == key)
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.state.partitions.iter().map(|log| log.lock().len()).sum()
    }

    /// Number of `send` calls observed, successful or not.
    pub fn send_attempts(&self) -> u64 {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn sessions_aborted(&self) -> u64 {
        self.state.sessions_aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::Disconnected(format!(
                "broker '{}' refused the connection",
                self.state.name
            )));
        }
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        debug!(broker = %self.state.name, topic = %self.state.topic, "session opened");
        Ok(Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
        }))
    }
}

struct MemorySession {
    state: Arc<BrokerState>,
    open: AtomicBool,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn send(&self, message: BrokerMessage, ack: AckMode) -> Result<DeliveryReceipt, BrokerError> {
        self.state.send_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if message.topic != self.state.topic {
            return Err(BrokerError::UnknownTopic(message.topic));
        }

        let partition = partition_for(&message.key, self.state.partitions.len() as u32);

        let scripted = self.state.scripted.lock().pop_front();
        if let Some(err) = scripted {
            debug!(partition, error = %err, "scripted send failure");
            return Err(err);
        }
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(BrokerError::LeaderUnavailable { partition });
        }

        match ack {
            AckMode::None => {
                self.state.append(partition, message);
                Ok(DeliveryReceipt::Queued { partition })
            }
            AckMode::Leader => {
                let latency = *self.state.ack_latency.lock();
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                    if !self.open.load(Ordering::SeqCst) {
                        return Err(BrokerError::Closed);
                    }
                }
                let offset = self.state.append(partition, message);
                Ok(DeliveryReceipt::Acknowledged { partition, offset })
            }
        }
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
            debug!(broker = %self.state.name, "session closed");
        }
    }

    fn abort(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.sessions_aborted.fetch_add(1, Ordering::SeqCst);
            warn!(broker = %self.state.name, "session aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: &str) -> BrokerMessage {
        BrokerMessage {
            topic: "transactions".into(),
            key: Bytes::copy_from_slice(key.as_bytes()),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[tokio::test]
    async fn acknowledged_sends_get_increasing_offsets() {
        let broker = InMemoryBroker::new("t", "transactions", 4);
        let session = broker.connect().await.unwrap();

        let first = session.send(message("k"), AckMode::Leader).await.unwrap();
        let second = session.send(message("k"), AckMode::Leader).await.unwrap();

        let p = broker.partition_of(b"k");
        assert_eq!(first, DeliveryReceipt::Acknowledged { partition: p, offset: 0 });
        assert_eq!(second, DeliveryReceipt::Acknowledged { partition: p, offset: 1 });
        assert_eq!(broker.messages_for_key(b"k").len(), 2);
    }

    #[tokio::test]
    async fn fire_and_forget_returns_queued() {
        let broker = InMemoryBroker::new("t", "transactions", 2);
        let session = broker.connect().await.unwrap();
        let receipt = session.send(message("a"), AckMode::None).await.unwrap();
        assert!(matches!(receipt, DeliveryReceipt::Queued { .. }));
        assert_eq!(broker.message_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_broker_fails_sends_and_connections() {
        let broker = InMemoryBroker::new("t", "transactions", 2);
        let session = broker.connect().await.unwrap();
        broker.set_available(false);

        let err = session.send(message("a"), AckMode::Leader).await.unwrap_err();
        assert!(matches!(err, BrokerError::LeaderUnavailable { .. }));
        assert!(broker.connect().await.is_err());
        assert_eq!(broker.message_count(), 0);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::new("t", "transactions", 1);
        broker.fail_next([
            BrokerError::Timeout(Duration::from_millis(1)),
            BrokerError::Serialization("bad".into()),
        ]);
        let session = broker.connect().await.unwrap();

        assert!(matches!(
            session.send(message("a"), AckMode::Leader).await,
            Err(BrokerError::Timeout(_))
        ));
        assert!(matches!(
            session.send(message("a"), AckMode::Leader).await,
            Err(BrokerError::Serialization(_))
        ));
        assert!(session.send(message("a"), AckMode::Leader).await.is_ok());
        assert_eq!(broker.send_attempts(), 3);
    }

    #[tokio::test]
    async fn unknown_topic_is_rejected() {
        let broker = InMemoryBroker::new("t", "transactions", 1);
        let session = broker.connect().await.unwrap();
        let mut msg = message("a");
        msg.topic = "other".into();
        assert_eq!(
            session.send(msg, AckMode::Leader).await,
            Err(BrokerError::UnknownTopic("other".into()))
        );
    }

    #[tokio::test]
    async fn close_and_abort_are_counted_once() {
        let broker = InMemoryBroker::new("t", "transactions", 1);
        let session = broker.connect().await.unwrap();
        session.close().await;
        session.close().await;
        session.abort();
        assert_eq!(broker.sessions_closed(), 1);
        assert_eq!(broker.sessions_aborted(), 0);
        assert_eq!(
            session.send(message("a"), AckMode::Leader).await,
            Err(BrokerError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_ack_wait_appends_nothing() {
        let broker = InMemoryBroker::new("t", "transactions", 1);
        broker.set_ack_latency(Duration::from_secs(5));
        let session = broker.connect().await.unwrap();

        let res = tokio::time::timeout(
            Duration::from_secs(1),
            session.send(message("a"), AckMode::Leader),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(broker.message_count(), 0);
    }
}
