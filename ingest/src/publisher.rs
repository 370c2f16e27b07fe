//! # Publish Client Adapter
//!
//! Owns the single long-lived broker session and turns a validated
//! [`TransactionRecord`] into a keyed broker message.
//!
//! ## Admission
//!
//! At most `in_flight_limit` sends are outstanding at any moment. When the
//! limit is reached a new publish either fails immediately with
//! [`PublishError::QueueFull`] ([`Backpressure::FailFast`]) or waits for a
//! slot no longer than the configured timeout ([`Backpressure::Wait`]).
//!
//! ## Cancellation
//!
//! Each admitted send runs on its own task, and that task owns the in-flight
//! permit. If the caller stops waiting (request deadline, client hang-up) the
//! send still runs to completion or to its own `send_timeout`, and the permit
//! is returned exactly once. A record is therefore either fully handed to the
//! broker or fully abandoned, never half-sent.
//!
//! ## Lifecycle
//!
//! [`Publisher::connect`] acquires the session once. [`Publisher::close`]
//! stops admissions, drains in-flight sends for a bounded grace period,
//! flushes, and releases the session. If the publisher is dropped without
//! `close` (panic, early return), the session is aborted in `Drop`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::broker::{BrokerConnector, BrokerError, BrokerMessage, BrokerSession, DeliveryReceipt};
use crate::config;
use crate::transaction::TransactionRecord;

pub use crate::broker::AckMode;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens when the in-flight limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Refuse immediately.
    FailFast,
    /// Wait for a slot up to `timeout`, then refuse.
    Wait { timeout: Duration },
}

/// Publisher settings. Usually derived from
/// [`IngestConfig::publisher_config`](crate::config::IngestConfig::publisher_config).
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub topic: String,
    pub in_flight_limit: usize,
    pub backpressure: Backpressure,
    pub ack_mode: AckMode,
    pub send_timeout: Duration,
    pub max_message_bytes: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: config::DEFAULT_TOPIC.to_string(),
            in_flight_limit: config::DEFAULT_IN_FLIGHT_LIMIT,
            backpressure: Backpressure::Wait {
                timeout: Duration::from_millis(config::DEFAULT_QUEUE_WAIT_MS),
            },
            ack_mode: AckMode::Leader,
            send_timeout: Duration::from_millis(config::DEFAULT_SEND_TIMEOUT_MS),
            max_message_bytes: config::DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes & Errors
// ---------------------------------------------------------------------------

/// Result of a hand-off attempt.
///
/// The publisher itself only ever returns `Acknowledged` or `Pending`.
/// `Rejected` and `Error` describe records that never made it, and are
/// produced by the coordinator when it reports a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishOutcome {
    /// The broker confirmed durability.
    Acknowledged { partition: u32, offset: u64 },
    /// Sent and buffered by the broker; durability not yet confirmed.
    Pending { partition: u32 },
    /// Never sent: the input was refused.
    Rejected { reason: &'static str },
    /// Sending failed.
    Error { reason: &'static str },
}

impl PublishOutcome {
    pub fn partition(&self) -> Option<u32> {
        match self {
            Self::Acknowledged { partition, .. } | Self::Pending { partition } => Some(*partition),
            _ => None,
        }
    }
}

/// Why a publish failed without retry being worthwhile.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalCause {
    /// The broker refused the message for a reason a resend cannot fix.
    #[error(transparent)]
    Broker(BrokerError),

    /// The payload is larger than the publisher will ever send.
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// The publisher has been closed.
    #[error("publisher is closed")]
    Closed,

    /// The send task panicked or was cancelled by the runtime.
    #[error("send task failed: {0}")]
    TaskFailed(String),
}

/// Typed publish failure. The coordinator alone decides what to do with it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Transient broker trouble; the same record may succeed later.
    #[error("retryable publish failure: {0}")]
    Retryable(BrokerError),

    /// Unrecoverable; resending the same record will fail the same way.
    #[error("fatal publish failure: {0}")]
    Fatal(FatalCause),

    /// The in-flight limit is reached and the backpressure policy gave up.
    #[error("in-flight limit of {limit} reached")]
    QueueFull { limit: usize },
}

impl PublishError {
    /// Classifies a broker error.
    pub fn from_broker(err: BrokerError) -> Self {
        match err {
            BrokerError::Closed => Self::Fatal(FatalCause::Closed),
            e if e.is_retryable() => Self::Retryable(e),
            e => Self::Fatal(FatalCause::Broker(e)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Retryable(_) => "RETRYABLE",
            Self::Fatal(_) => "FATAL",
            Self::QueueFull { .. } => "QUEUE_FULL",
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionPublisher
// ---------------------------------------------------------------------------

/// The seam between the coordinator and the broker adapter. Tests swap in
/// doubles here.
#[async_trait]
pub trait TransactionPublisher: Send + Sync {
    async fn publish(&self, record: &TransactionRecord) -> Result<PublishOutcome, PublishError>;
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    acknowledged: AtomicU64,
    pending: AtomicU64,
    retryable_failures: AtomicU64,
    fatal_failures: AtomicU64,
    queue_full: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<PublishOutcome, PublishError>) {
        let counter = match result {
            Ok(PublishOutcome::Acknowledged { .. }) => &self.acknowledged,
            Ok(PublishOutcome::Pending { .. }) => &self.pending,
            Ok(_) => return,
            Err(PublishError::Retryable(_)) => &self.retryable_failures,
            Err(PublishError::Fatal(_)) => &self.fatal_failures,
            Err(PublishError::QueueFull { .. }) => &self.queue_full,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStats {
    pub topic: String,
    pub in_flight: usize,
    pub in_flight_limit: usize,
    pub sent: u64,
    pub acknowledged: u64,
    pub pending: u64,
    pub retryable_failures: u64,
    pub fatal_failures: u64,
    pub queue_full: u64,
    pub closed: bool,
}

/// What [`Publisher::close`] managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every in-flight send finished inside the grace period.
    pub drained: bool,
    /// Sends still outstanding when the grace period ran out.
    pub abandoned: usize,
    /// The session flush completed.
    pub flushed: bool,
    /// False when the session had already been released by an earlier call.
    pub released: bool,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Broker adapter shared by every ingestion call.
pub struct Publisher {
    session: Arc<dyn BrokerSession>,
    config: PublisherConfig,
    permits: Arc<Semaphore>,
    closing: AtomicBool,
    released: AtomicBool,
    counters: Arc<Counters>,
}

impl Publisher {
    /// Opens the broker session. The only place a connection is acquired.
    pub async fn connect(
        connector: &dyn BrokerConnector,
        config: PublisherConfig,
    ) -> Result<Self, PublishError> {
        let session = connector.connect().await.map_err(PublishError::from_broker)?;
        info!(
            topic = %config.topic,
            in_flight_limit = config.in_flight_limit,
            ack_mode = ?config.ack_mode,
            "publisher connected"
        );
        Ok(Self::with_session(session, config))
    }

    /// Wraps an already open session.
    pub fn with_session(session: Arc<dyn BrokerSession>, config: PublisherConfig) -> Self {
        let limit = config.in_flight_limit.max(1);
        Self {
            session,
            permits: Arc::new(Semaphore::new(limit)),
            config: PublisherConfig {
                in_flight_limit: limit,
                ..config
            },
            closing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Sends currently holding an in-flight slot.
    pub fn in_flight(&self) -> usize {
        if self.permits.is_closed() {
            return 0;
        }
        self.config
            .in_flight_limit
            .saturating_sub(self.permits.available_permits())
    }

    pub fn stats(&self) -> PublisherStats {
        let c = &self.counters;
        PublisherStats {
            topic: self.config.topic.clone(),
            in_flight: self.in_flight(),
            in_flight_limit: self.config.in_flight_limit,
            sent: c.sent.load(Ordering::Relaxed),
            acknowledged: c.acknowledged.load(Ordering::Relaxed),
            pending: c.pending.load(Ordering::Relaxed),
            retryable_failures: c.retryable_failures.load(Ordering::Relaxed),
            fatal_failures: c.fatal_failures.load(Ordering::Relaxed),
            queue_full: c.queue_full.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, PublishError> {
        let limit = self.config.in_flight_limit;
        match self.config.backpressure {
            Backpressure::FailFast => {
                Arc::clone(&self.permits)
                    .try_acquire_owned()
                    .map_err(|e| match e {
                        TryAcquireError::NoPermits => PublishError::QueueFull { limit },
                        TryAcquireError::Closed => PublishError::Fatal(FatalCause::Closed),
                    })
            }
            Backpressure::Wait { timeout } => {
                match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(PublishError::Fatal(FatalCause::Closed)),
                    Err(_) => Err(PublishError::QueueFull { limit }),
                }
            }
        }
    }

    /// Hands one record to the broker, keyed by its id.
    pub async fn publish(&self, record: &TransactionRecord) -> Result<PublishOutcome, PublishError> {
        if self.is_closed() {
            return Err(PublishError::Fatal(FatalCause::Closed));
        }

        let size = record.payload_len();
        if size > self.config.max_message_bytes {
            let err = PublishError::Fatal(FatalCause::MessageTooLarge {
                size,
                max: self.config.max_message_bytes,
            });
            self.counters.record(&Err(err.clone()));
            return Err(err);
        }

        let permit = match self.admit().await {
            Ok(permit) => permit,
            Err(err) => {
                self.counters.record(&Err(err.clone()));
                debug!(id = %record.id, error = %err, "publish not admitted");
                return Err(err);
            }
        };

        let message = BrokerMessage {
            topic: self.config.topic.clone(),
            key: Bytes::copy_from_slice(record.id.as_key()),
            payload: record.raw_payload.clone(),
        };
        let session = Arc::clone(&self.session);
        let counters = Arc::clone(&self.counters);
        let ack = self.config.ack_mode;
        let send_timeout = self.config.send_timeout;

        counters.sent.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            let _permit = permit;
            let receipt = match tokio::time::timeout(send_timeout, session.send(message, ack)).await {
                Ok(receipt) => receipt,
                Err(_) => Err(BrokerError::Timeout(send_timeout)),
            };
            let result = match receipt {
                Ok(DeliveryReceipt::Acknowledged { partition, offset }) => {
                    Ok(PublishOutcome::Acknowledged { partition, offset })
                }
                Ok(DeliveryReceipt::Queued { partition }) => Ok(PublishOutcome::Pending { partition }),
                Err(e) => Err(PublishError::from_broker(e)),
            };
            counters.record(&result);
            result
        });

        let result = task
            .await
            .map_err(|e| PublishError::Fatal(FatalCause::TaskFailed(e.to_string())))?;

        match &result {
            Ok(outcome) => debug!(id = %record.id, ?outcome, "publish completed"),
            Err(err) => debug!(id = %record.id, error = %err, "publish failed"),
        }
        result
    }

    /// Stops admissions, drains in-flight sends for up to `grace`, flushes,
    /// and releases the session. Safe to call more than once; only the first
    /// call releases.
    pub async fn close(&self, grace: Duration) -> ShutdownReport {
        let started = Instant::now();
        self.closing.store(true, Ordering::SeqCst);

        if self.released.load(Ordering::SeqCst) {
            return ShutdownReport {
                drained: true,
                abandoned: 0,
                flushed: true,
                released: false,
                elapsed: started.elapsed(),
            };
        }

        let limit = u32::try_from(self.config.in_flight_limit).unwrap_or(u32::MAX);
        let drained = match tokio::time::timeout(grace, self.permits.acquire_many(limit)).await {
            Ok(Ok(all)) => {
                all.forget();
                true
            }
            _ => false,
        };
        let abandoned = if drained { 0 } else { self.in_flight() };
        self.permits.close();

        let remaining = grace.saturating_sub(started.elapsed());
        let flushed = matches!(
            tokio::time::timeout(remaining, self.session.flush()).await,
            Ok(Ok(()))
        );

        if self.released.swap(true, Ordering::SeqCst) {
            return ShutdownReport {
                drained,
                abandoned,
                flushed,
                released: false,
                elapsed: started.elapsed(),
            };
        }
        self.session.close().await;

        let report = ShutdownReport {
            drained,
            abandoned,
            flushed,
            released: true,
            elapsed: started.elapsed(),
        };
        if drained {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "publisher closed");
        } else {
            warn!(abandoned, grace_ms = grace.as_millis() as u64, "publisher closed with sends outstanding");
        }
        report
    }
}

#[async_trait]
impl TransactionPublisher for Publisher {
    async fn publish(&self, record: &TransactionRecord) -> Result<PublishOutcome, PublishError> {
        Publisher::publish(self, record).await
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            warn!("publisher dropped without close; aborting broker session");
            self.session.abort();
        }
    }
}
