//! # Ingestion Coordinator
//!
//! Drives one raw payload through the pipeline and decides what the caller
//! is told:
//!
//! ```text
//! raw ──► decode ──✗──► Rejected(MALFORMED | MISSING_FIELD | INVALID_AMOUNT | INVALID_ID)
//!            │
//!            ▼
//!        dedup hit? ──► Accepted(Duplicate)
//!            │
//!            ▼
//!        publish ──► Acknowledged / Pending ──► Accepted
//!            │
//!            ├── Retryable ──► backoff, publish again ... ──► Unavailable(RETRYABLE_EXHAUSTED)
//!            ├── Fatal ─────────────────────────────────► Unavailable(FATAL)
//!            ├── QueueFull ─────────────► Unavailable(QUEUE_FULL) | Rejected(QUEUE_FULL)
//!            └── request deadline ──────────────────────► Unavailable(DEADLINE_EXCEEDED)
//! ```
//!
//! The coordinator is the only place retry decisions are made. It holds no
//! per-record shared state; concurrent calls share the publisher, the
//! optional dedup window and the observer, all of which are `Send + Sync`.

pub mod dedup;
pub mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::publisher::{PublishError, PublishOutcome, TransactionPublisher};
use crate::transaction::{decode, TransactionId, TransactionRecord, TransactionStatus, ValidationReason};

use self::dedup::{DedupPolicy, DedupWindow};
use self::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Policies & Config
// ---------------------------------------------------------------------------

/// What the caller is told when the publisher refuses admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Report `Unavailable(QUEUE_FULL)`: try again later.
    Unavailable,
    /// Report `Rejected(QUEUE_FULL)`: the caller should shed load.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    pub overload: OverloadPolicy,
    pub request_timeout: Duration,
    pub dedup: DedupPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for CoordinatorConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            overload: config.overload_policy,
            request_timeout: config.request_timeout(),
            dedup: config.dedup_policy(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How an accepted transaction reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Delivery {
    /// The broker confirmed durability.
    Acknowledged { partition: u32, offset: u64 },
    /// Handed off; durability not yet confirmed.
    Pending { partition: u32 },
    /// Already accepted inside the dedup window; not published again.
    Duplicate,
}

/// "Fix your input" reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Validation(ValidationReason),
    QueueFull,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(reason) => reason.code(),
            Self::QueueFull => "QUEUE_FULL",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// "Try again later" reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    RetryableExhausted,
    Fatal,
    QueueFull,
    DeadlineExceeded,
}

impl UnavailableReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RetryableExhausted => "RETRYABLE_EXHAUSTED",
            Self::Fatal => "FATAL",
            Self::QueueFull => "QUEUE_FULL",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Caller-visible result of one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResult {
    Accepted {
        id: TransactionId,
        delivery: Delivery,
    },
    Rejected {
        reason: RejectReason,
        detail: String,
    },
    Unavailable {
        reason: UnavailableReason,
        detail: String,
    },
}

impl IngestResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Reason code for non-accepted results.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { reason, .. } => Some(reason.code()),
            Self::Unavailable { reason, .. } => Some(reason.code()),
        }
    }

    /// Terminal lifecycle status this result corresponds to.
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Accepted { .. } => TransactionStatus::Enqueued,
            Self::Rejected { .. } => TransactionStatus::Rejected,
            Self::Unavailable { .. } => TransactionStatus::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Terminal transition of one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    /// `None` when the payload never decoded.
    pub id: Option<TransactionId>,
    pub status: TransactionStatus,
    /// `None` for dedup hits: nothing was published.
    pub outcome: Option<PublishOutcome>,
    /// Publish calls made, retries included.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl IngestEvent {
    /// Coarse result label: `accepted`, `duplicate`, `rejected` or `unavailable`.
    pub fn label(&self) -> &'static str {
        match (self.status, &self.outcome) {
            (TransactionStatus::Enqueued, None) => "duplicate",
            (TransactionStatus::Enqueued, _) => "accepted",
            (TransactionStatus::Rejected, _) => "rejected",
            _ => "unavailable",
        }
    }

    /// Fine-grained reason: delivery kind for acceptances, reason code otherwise.
    pub fn reason(&self) -> &'static str {
        match &self.outcome {
            None => "DUPLICATE",
            Some(PublishOutcome::Acknowledged { .. }) => "ACKNOWLEDGED",
            Some(PublishOutcome::Pending { .. }) => "PENDING",
            Some(PublishOutcome::Rejected { reason }) | Some(PublishOutcome::Error { reason }) => {
                *reason
            }
        }
    }
}

/// Receives terminal transitions. Implementations must not block.
pub trait IngestObserver: Send + Sync {
    fn on_terminal(&self, event: &IngestEvent);

    /// A retryable failure is about to be retried after `delay`.
    fn on_retry(&self, _id: &TransactionId, _attempt: u32, _delay: Duration, _error: &PublishError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl IngestObserver for NoopObserver {
    fn on_terminal(&self, _event: &IngestEvent) {}
}

// ---------------------------------------------------------------------------
// IngestCoordinator
// ---------------------------------------------------------------------------

pub struct IngestCoordinator {
    publisher: Arc<dyn TransactionPublisher>,
    config: CoordinatorConfig,
    dedup: Option<DedupWindow>,
    observer: Arc<dyn IngestObserver>,
}

impl IngestCoordinator {
    pub fn new(publisher: Arc<dyn TransactionPublisher>, config: CoordinatorConfig) -> Self {
        Self {
            publisher,
            dedup: DedupWindow::from_policy(config.dedup),
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Ingests one raw payload. Never panics and never returns an error:
    /// every failure is a typed result.
    pub async fn ingest(&self, raw: &[u8]) -> IngestResult {
        let started = Instant::now();

        let mut record = match decode(raw) {
            Ok(record) => record,
            Err(err) => {
                debug!(reason = err.reason.code(), detail = %err.detail, "payload rejected");
                let reason = RejectReason::Validation(err.reason);
                self.report(
                    None,
                    TransactionStatus::Rejected,
                    Some(PublishOutcome::Rejected { reason: reason.code() }),
                    0,
                    started,
                );
                return IngestResult::Rejected {
                    reason,
                    detail: err.to_string(),
                };
            }
        };

        if let Some(window) = &self.dedup {
            if window.contains(&record.id) {
                debug!(id = %record.id, "duplicate inside dedup window");
                self.finish(&mut record, TransactionStatus::Enqueued);
                self.report(Some(record.id.clone()), TransactionStatus::Enqueued, None, 0, started);
                return IngestResult::Accepted {
                    id: record.id,
                    delivery: Delivery::Duplicate,
                };
            }
        }

        let mut progress = Progress::default();
        let published = tokio::time::timeout(
            self.config.request_timeout,
            self.publish_with_retry(&record, &mut progress),
        )
        .await;
        let attempts = progress.attempts;

        let (result, outcome) = match published {
            Ok(Ok(outcome)) => match delivery_of(&outcome) {
                Some(delivery) => (
                    IngestResult::Accepted {
                        id: record.id.clone(),
                        delivery,
                    },
                    outcome,
                ),
                None => (
                    IngestResult::Unavailable {
                        reason: UnavailableReason::Fatal,
                        detail: format!("publisher returned {outcome:?} as a success"),
                    },
                    PublishOutcome::Error { reason: "FATAL" },
                ),
            },
            Ok(Err(err)) => {
                let result = self.classify(err);
                let outcome = match &result {
                    IngestResult::Rejected { reason, .. } => PublishOutcome::Rejected { reason: reason.code() },
                    other => PublishOutcome::Error {
                        reason: other.reason_code().unwrap_or("FATAL"),
                    },
                };
                (result, outcome)
            }
            Err(_) => (
                IngestResult::Unavailable {
                    reason: UnavailableReason::DeadlineExceeded,
                    detail: self.deadline_detail(&progress),
                },
                PublishOutcome::Error {
                    reason: UnavailableReason::DeadlineExceeded.code(),
                },
            ),
        };

        let status = result.status();
        self.finish(&mut record, status);

        match &result {
            IngestResult::Accepted { id, delivery } => {
                debug!(%id, ?delivery, attempts, "transaction accepted");
                if let Some(window) = &self.dedup {
                    window.remember(id.clone());
                }
            }
            IngestResult::Rejected { reason, detail } => {
                info!(id = %record.id, %reason, %detail, "transaction rejected");
            }
            IngestResult::Unavailable { reason, detail } => {
                warn!(id = %record.id, %reason, %detail, attempts, "transaction not handed off");
            }
        }

        self.report(Some(record.id.clone()), status, Some(outcome), attempts, started);
        result
    }

    async fn publish_with_retry(
        &self,
        record: &TransactionRecord,
        progress: &mut Progress,
    ) -> Result<PublishOutcome, PublishError> {
        let budget = self.config.retry.attempts();
        loop {
            progress.attempts += 1;
            progress.outstanding = true;
            let published = self.publisher.publish(record).await;
            progress.outstanding = false;

            match published {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && progress.attempts < budget => {
                    let delay = self.config.retry.delay(progress.attempts);
                    debug!(
                        id = %record.id,
                        attempt = progress.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying publish"
                    );
                    self.observer.on_retry(&record.id, progress.attempts, delay, &err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Says whether the deadline caught a publish mid-flight. Such a record
    /// may still reach the broker after the caller was told it did not.
    fn deadline_detail(&self, progress: &Progress) -> String {
        let deadline_ms = self.config.request_timeout.as_millis();
        if progress.outstanding {
            format!(
                "attempt {} still in flight at the {deadline_ms}ms deadline; \
                 the broker may still append it",
                progress.attempts
            )
        } else {
            format!(
                "deadline of {deadline_ms}ms reached while backing off after {} failed attempts; \
                 nothing in flight",
                progress.attempts
            )
        }
    }

    fn classify(&self, err: PublishError) -> IngestResult {
        match err {
            PublishError::Retryable(cause) => IngestResult::Unavailable {
                reason: UnavailableReason::RetryableExhausted,
                detail: format!(
                    "gave up after {} attempts: {cause}",
                    self.config.retry.attempts()
                ),
            },
            PublishError::Fatal(cause) => IngestResult::Unavailable {
                reason: UnavailableReason::Fatal,
                detail: cause.to_string(),
            },
            err @ PublishError::QueueFull { .. } => match self.config.overload {
                OverloadPolicy::Unavailable => IngestResult::Unavailable {
                    reason: UnavailableReason::QueueFull,
                    detail: err.to_string(),
                },
                OverloadPolicy::Reject => IngestResult::Rejected {
                    reason: RejectReason::QueueFull,
                    detail: err.to_string(),
                },
            },
        }
    }

    fn finish(&self, record: &mut TransactionRecord, status: TransactionStatus) {
        if let Err(err) = record.advance(status) {
            warn!(id = %record.id, error = %err, "lifecycle violation");
        }
    }

    fn report(
        &self,
        id: Option<TransactionId>,
        status: TransactionStatus,
        outcome: Option<PublishOutcome>,
        attempts: u32,
        started: Instant,
    ) {
        self.observer.on_terminal(&IngestEvent {
            id,
            status,
            outcome,
            attempts,
            elapsed: started.elapsed(),
        });
    }
}

/// How far one ingestion call got before it finished or was cut off.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    /// A publish call has started and not yet returned.
    outstanding: bool,
}

fn delivery_of(outcome: &PublishOutcome) -> Option<Delivery> {
    match *outcome {
        PublishOutcome::Acknowledged { partition, offset } => {
            Some(Delivery::Acknowledged { partition, offset })
        }
        PublishOutcome::Pending { partition } => Some(Delivery::Pending { partition }),
        PublishOutcome::Rejected { .. } | PublishOutcome::Error { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::publisher::FatalCause;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Publisher double: replays scripted results, then acknowledges.
    #[derive(Default)]
    struct ScriptedPublisher {
        script: Mutex<VecDeque<Result<PublishOutcome, PublishError>>>,
        calls: Mutex<Vec<TransactionId>>,
    }

    impl ScriptedPublisher {
        fn with(script: Vec<Result<PublishOutcome, PublishError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<TransactionId> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl TransactionPublisher for ScriptedPublisher {
        async fn publish(&self, record: &TransactionRecord) -> Result<PublishOutcome, PublishError> {
            self.calls.lock().push(record.id.clone());
            let next = self.script.lock().pop_front();
            next.unwrap_or(Ok(PublishOutcome::Acknowledged {
                partition: 0,
                offset: 0,
            }))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<IngestEvent>>,
        retries: Mutex<Vec<u32>>,
    }

    impl IngestObserver for Recorder {
        fn on_terminal(&self, event: &IngestEvent) {
            self.events.lock().push(event.clone());
        }

        fn on_retry(&self, _id: &TransactionId, attempt: u32, _delay: Duration, _error: &PublishError) {
            self.retries.lock().push(attempt);
        }
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(10),
                backoff_max: Duration::from_millis(40),
                jitter: false,
            },
            overload: OverloadPolicy::Unavailable,
            request_timeout: Duration::from_secs(5),
            dedup: DedupPolicy::Disabled,
        }
    }

    fn retryable() -> Result<PublishOutcome, PublishError> {
        Err(PublishError::Retryable(BrokerError::LeaderUnavailable { partition: 0 }))
    }

    const VALID: &[u8] = br#"{"id":"t1","amount":100.0}"#;

    #[tokio::test]
    async fn accepts_valid_payload() {
        let publisher = ScriptedPublisher::with(vec![]);
        let coordinator = IngestCoordinator::new(publisher.clone(), config());

        let result = coordinator.ingest(VALID).await;
        assert_eq!(
            result,
            IngestResult::Accepted {
                id: TransactionId::from("t1"),
                delivery: Delivery::Acknowledged { partition: 0, offset: 0 },
            }
        );
        assert_eq!(publisher.calls(), vec![TransactionId::from("t1")]);
    }

    #[tokio::test]
    async fn validation_failure_never_publishes() {
        let publisher = ScriptedPublisher::with(vec![]);
        let coordinator = IngestCoordinator::new(publisher.clone(), config());

        let result = coordinator.ingest(br#"{"id":"t2","amount":-5}"#).await;
        assert_eq!(result.reason_code(), Some("INVALID_AMOUNT"));
        assert_eq!(result.status(), TransactionStatus::Rejected);
        assert!(publisher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_accepts() {
        let publisher = ScriptedPublisher::with(vec![retryable(), retryable()]);
        let recorder = Arc::new(Recorder::default());
        let coordinator =
            IngestCoordinator::new(publisher.clone(), config()).with_observer(recorder.clone());

        let result = coordinator.ingest(VALID).await;
        assert!(result.is_accepted());
        assert_eq!(publisher.calls().len(), 3);
        assert_eq!(*recorder.retries.lock(), vec![1, 2]);

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attempts, 3);
        assert_eq!(events[0].label(), "accepted");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_unavailable() {
        let publisher = ScriptedPublisher::with(vec![retryable(), retryable(), retryable(), retryable()]);
        let coordinator = IngestCoordinator::new(publisher.clone(), config());

        let started = Instant::now();
        let result = coordinator.ingest(VALID).await;

        assert_eq!(result.reason_code(), Some("RETRYABLE_EXHAUSTED"));
        assert_eq!(publisher.calls().len(), 3);
        // 10ms + 20ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let publisher = ScriptedPublisher::with(vec![Err(PublishError::Fatal(FatalCause::Broker(
            BrokerError::UnknownTopic("transactions".into()),
        )))]);
        let coordinator = IngestCoordinator::new(publisher.clone(), config());

        let result = coordinator.ingest(VALID).await;
        assert_eq!(result.reason_code(), Some("FATAL"));
        assert_eq!(publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn queue_full_follows_overload_policy() {
        let full = || Err(PublishError::QueueFull { limit: 1 });

        let publisher = ScriptedPublisher::with(vec![full()]);
        let coordinator = IngestCoordinator::new(publisher.clone(), config());
        let result = coordinator.ingest(VALID).await;
        assert!(matches!(
            result,
            IngestResult::Unavailable { reason: UnavailableReason::QueueFull, .. }
        ));
        assert_eq!(publisher.calls().len(), 1);

        let publisher = ScriptedPublisher::with(vec![full()]);
        let coordinator = IngestCoordinator::new(
            publisher.clone(),
            CoordinatorConfig {
                overload: OverloadPolicy::Reject,
                ..config()
            },
        );
        let result = coordinator.ingest(VALID).await;
        assert!(matches!(
            result,
            IngestResult::Rejected { reason: RejectReason::QueueFull, .. }
        ));
        assert_eq!(publisher.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_deadline_bounds_the_call() {
        let publisher = ScriptedPublisher::with(vec![retryable(); 10]);
        let coordinator = IngestCoordinator::new(
            publisher.clone(),
            CoordinatorConfig {
                retry: RetryPolicy {
                    max_attempts: 10,
                    backoff_base: Duration::from_secs(1),
                    backoff_max: Duration::from_secs(1),
                    jitter: false,
                },
                request_timeout: Duration::from_millis(2_500),
                ..config()
            },
        );

        let result = coordinator.ingest(VALID).await;
        assert_eq!(result.reason_code(), Some("DEADLINE_EXCEEDED"));
        assert_eq!(publisher.calls().len(), 3);
        let IngestResult::Unavailable { detail, .. } = result else {
            panic!("expected unavailable");
        };
        assert!(detail.contains("backing off after 3 failed attempts"), "{detail}");
    }

    /// Publisher double whose sends never return.
    struct StalledPublisher;

    #[async_trait]
    impl TransactionPublisher for StalledPublisher {
        async fn publish(&self, _record: &TransactionRecord) -> Result<PublishOutcome, PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_send_is_reported_as_possibly_delivered() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = IngestCoordinator::new(
            Arc::new(StalledPublisher),
            CoordinatorConfig {
                request_timeout: Duration::from_millis(500),
                ..config()
            },
        )
        .with_observer(recorder.clone());

        let result = coordinator.ingest(VALID).await;
        let IngestResult::Unavailable { reason, detail } = result else {
            panic!("expected unavailable");
        };
        assert_eq!(reason, UnavailableReason::DeadlineExceeded);
        assert!(detail.contains("attempt 1 still in flight"), "{detail}");
        assert!(detail.contains("may still append"), "{detail}");
        assert_eq!(recorder.events.lock()[0].attempts, 1);
    }

    #[tokio::test]
    async fn dedup_window_suppresses_repeat_acceptance() {
        let publisher = ScriptedPublisher::with(vec![]);
        let recorder = Arc::new(Recorder::default());
        let coordinator = IngestCoordinator::new(
            publisher.clone(),
            CoordinatorConfig {
                dedup: DedupPolicy::Window {
                    ttl: Duration::from_secs(60),
                    capacity: 10,
                },
                ..config()
            },
        )
        .with_observer(recorder.clone());

        assert!(coordinator.ingest(VALID).await.is_accepted());
        let second = coordinator.ingest(VALID).await;
        assert_eq!(
            second,
            IngestResult::Accepted {
                id: TransactionId::from("t1"),
                delivery: Delivery::Duplicate,
            }
        );
        assert_eq!(publisher.calls().len(), 1);
        assert_eq!(recorder.events.lock()[1].label(), "duplicate");
    }

    #[tokio::test]
    async fn failed_publish_is_not_remembered_for_dedup() {
        let publisher = ScriptedPublisher::with(vec![Err(PublishError::QueueFull { limit: 1 })]);
        let coordinator = IngestCoordinator::new(
            publisher.clone(),
            CoordinatorConfig {
                dedup: DedupPolicy::Window {
                    ttl: Duration::from_secs(60),
                    capacity: 10,
                },
                ..config()
            },
        );

        assert!(!coordinator.ingest(VALID).await.is_accepted());
        let retry = coordinator.ingest(VALID).await;
        assert!(matches!(
            retry,
            IngestResult::Accepted { delivery: Delivery::Acknowledged { .. }, .. }
        ));
        assert_eq!(publisher.calls().len(), 2);
    }

    #[tokio::test]
    async fn observer_sees_rejections_without_id() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = IngestCoordinator::new(ScriptedPublisher::with(vec![]), config())
            .with_observer(recorder.clone());

        coordinator.ingest(b"{not json").await;
        let events = recorder.events.lock();
        assert_eq!(events[0].id, None);
        assert_eq!(events[0].label(), "rejected");
        assert_eq!(events[0].reason(), "MALFORMED");
    }
}
