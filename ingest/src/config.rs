//! # Ingestion Configuration & Constants
//!
//! Every tunable of the ingestion pipeline lives here, either as a named
//! constant (the default) or as a field of [`IngestConfig`]. The config is
//! assembled exactly once at process start and handed down by value; nothing
//! in the pipeline reads the environment on its own.
//!
//! Durations are stored as integer milliseconds so the struct round-trips
//! cleanly through TOML and environment variables. Use the accessor methods
//! to get [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::dedup::DedupPolicy;
use crate::coordinator::retry::RetryPolicy;
use crate::coordinator::OverloadPolicy;
use crate::publisher::{AckMode, Backpressure, PublisherConfig};

// ---------------------------------------------------------------------------
// Broker Defaults
// ---------------------------------------------------------------------------

/// Broker address used when nothing is configured. The `memory://` scheme
/// selects the in-process broker.
pub const DEFAULT_BROKER_ADDRESS: &str = "memory://local";

/// Topic every transaction is published to. Downstream fraud analysis
/// consumes from here.
pub const DEFAULT_TOPIC: &str = "transactions";

/// Partition count for the in-process broker.
pub const DEFAULT_PARTITIONS: u32 = 8;

/// Largest payload the publisher will hand to the broker. Matches the common
/// 1 MiB broker default for `message.max.bytes`.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

/// Maximum number of publishes admitted concurrently.
pub const DEFAULT_IN_FLIGHT_LIMIT: usize = 1024;

/// How long a publish waits for an in-flight slot under the `wait` policy.
pub const DEFAULT_QUEUE_WAIT_MS: u64 = 250;

/// Per-send deadline. A broker that has not acknowledged by then is treated
/// as a transient failure.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Total publish attempts per ingestion call, first try included.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Delay before the first retry. Doubles on every subsequent retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 50;

/// Upper bound for a single backoff delay.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

/// Deadline for one whole ingestion call, retries included. Must cover the
/// retry budget (see [`IngestConfig::retry_budget`]), which is 12 s with the
/// defaults above.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Grace period granted to in-flight sends at shutdown before forced close.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Dedup window. Zero disables dedup and leaves it to downstream consumers.
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 0;

/// Maximum number of remembered ids while dedup is enabled.
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration value that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required string field was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A numeric field that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// The backoff base exceeds the backoff cap.
    #[error("backoff_base_ms ({base}) must not exceed backoff_max_ms ({max})")]
    BackoffInverted { base: u64, max: u64 },

    /// The request deadline would cut the retry budget short.
    #[error(
        "request_timeout_ms ({request_ms}) is shorter than the retry budget ({budget_ms}ms); \
         raise it or lower retry_attempts/send_timeout_ms"
    )]
    DeadlineBelowRetryBudget { request_ms: u64, budget_ms: u64 },

    /// The broker address uses a scheme this build cannot connect to.
    #[error("unsupported broker address '{0}': expected memory://<name>")]
    UnsupportedBroker(String),
}

// ---------------------------------------------------------------------------
// IngestConfig
// ---------------------------------------------------------------------------

/// How the publisher reacts when the in-flight limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Return `QUEUE_FULL` immediately.
    FailFast,
    /// Wait up to `queue_wait_ms` for a slot, then return `QUEUE_FULL`.
    Wait,
}

/// Process-wide ingestion settings. Immutable once the node is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Broker connection target, e.g. `memory://local`.
    pub broker_address: String,
    /// Topic transactions are published to.
    pub topic: String,
    /// Partition count for the in-process broker.
    pub partitions: u32,
    /// Backpressure bound on concurrent publishes.
    pub in_flight_limit: usize,
    /// Fail fast or wait when the in-flight limit is reached.
    pub backpressure: BackpressureMode,
    /// Maximum wait for an in-flight slot under [`BackpressureMode::Wait`].
    pub queue_wait_ms: u64,
    /// Whether publishes wait for the broker's durability acknowledgment.
    pub ack_mode: AckMode,
    /// Per-send deadline.
    pub send_timeout_ms: u64,
    /// Total publish attempts per ingestion call.
    pub retry_attempts: u32,
    /// First backoff delay.
    pub backoff_base_ms: u64,
    /// Backoff cap.
    pub backoff_max_ms: u64,
    /// Randomize backoff delays (full jitter).
    pub backoff_jitter: bool,
    /// Deadline for a whole ingestion call.
    pub request_timeout_ms: u64,
    /// Drain period at shutdown.
    pub shutdown_grace_ms: u64,
    /// Largest accepted payload.
    pub max_message_bytes: usize,
    /// What the caller sees when the publisher is saturated.
    pub overload_policy: OverloadPolicy,
    /// Dedup window in milliseconds; zero disables dedup.
    pub dedup_window_ms: u64,
    /// Maximum remembered ids while dedup is enabled.
    pub dedup_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            broker_address: DEFAULT_BROKER_ADDRESS.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            partitions: DEFAULT_PARTITIONS,
            in_flight_limit: DEFAULT_IN_FLIGHT_LIMIT,
            backpressure: BackpressureMode::Wait,
            queue_wait_ms: DEFAULT_QUEUE_WAIT_MS,
            ack_mode: AckMode::Leader,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_jitter: true,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            overload_policy: OverloadPolicy::Unavailable,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl IngestConfig {
    /// Checks every field and returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::Empty("broker_address"));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Empty("topic"));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Zero("partitions"));
        }
        if self.in_flight_limit == 0 {
            return Err(ConfigError::Zero("in_flight_limit"));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Zero("send_timeout_ms"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Zero("retry_attempts"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("request_timeout_ms"));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Zero("max_message_bytes"));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffInverted {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        if self.dedup_window_ms > 0 && self.dedup_capacity == 0 {
            return Err(ConfigError::Zero("dedup_capacity"));
        }
        let budget_ms = u64::try_from(self.retry_budget().as_millis()).unwrap_or(u64::MAX);
        if self.request_timeout_ms < budget_ms {
            return Err(ConfigError::DeadlineBelowRetryBudget {
                request_ms: self.request_timeout_ms,
                budget_ms,
            });
        }
        Ok(())
    }

    /// Worst-case time to use up every publish attempt against a broker that
    /// never answers: each attempt may wait for a slot and then for its send
    /// deadline, plus every backoff at its ceiling.
    pub fn retry_budget(&self) -> Duration {
        let queue_wait = match self.backpressure {
            BackpressureMode::FailFast => 0,
            BackpressureMode::Wait => self.queue_wait_ms,
        };
        let per_attempt = Duration::from_millis(self.send_timeout_ms.saturating_add(queue_wait));
        per_attempt
            .saturating_mul(self.retry_attempts.max(1))
            .saturating_add(self.retry_policy().max_total_delay())
    }

    /// Name of the in-process broker selected by `broker_address`.
    ///
    /// Only `memory://<name>` is understood; the broker wire protocol for
    /// external clusters lives outside this crate.
    pub fn memory_broker_name(&self) -> Result<&str, ConfigError> {
        match self.broker_address.strip_prefix("memory://") {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ConfigError::UnsupportedBroker(self.broker_address.clone())),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Backpressure policy for the publisher.
    pub fn backpressure(&self) -> Backpressure {
        match self.backpressure {
            BackpressureMode::FailFast => Backpressure::FailFast,
            BackpressureMode::Wait => Backpressure::Wait {
                timeout: Duration::from_millis(self.queue_wait_ms),
            },
        }
    }

    /// Publisher settings derived from this config.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            topic: self.topic.clone(),
            in_flight_limit: self.in_flight_limit,
            backpressure: self.backpressure(),
            ack_mode: self.ack_mode,
            send_timeout: self.send_timeout(),
            max_message_bytes: self.max_message_bytes,
        }
    }

    /// Retry policy for the coordinator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
        }
    }

    /// Dedup policy for the coordinator.
    pub fn dedup_policy(&self) -> DedupPolicy {
        if self.dedup_window_ms == 0 {
            DedupPolicy::Disabled
        } else {
            DedupPolicy::Window {
                ttl: Duration::from_millis(self.dedup_window_ms),
                capacity: self.dedup_capacity,
            }
        }
    }
}
