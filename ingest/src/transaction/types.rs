//! Core type definitions for ingested transactions.
//!
//! The ingestion core interprets exactly two fields of a transaction: its
//! `id` (the idempotency and partition key) and its `amount` (validated, never
//! used for anything else). Everything else rides along untouched in the raw
//! payload that is forwarded to the broker.

use std::fmt;

use bytes::Bytes;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Idempotency key of a transaction.
///
/// Caller-supplied ids are normalized to their string form (`42` and `"42"`
/// are the same id). The id doubles as the broker partition key, so every
/// publish of one transaction lands in the same ordered stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key bytes handed to the broker for partition routing.
    pub fn as_key(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle tag of a record inside one ingestion call.
///
/// ```text
/// Received ──► Validated ──► Enqueued
///     │            ├──────► Rejected
///     └──► Rejected └─────► Failed
/// ```
///
/// `Enqueued`, `Rejected` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Bytes arrived, nothing checked yet.
    Received,
    /// Decoded and validated; ready to publish.
    Validated,
    /// Accepted by the publisher (acknowledged or pending acknowledgment).
    Enqueued,
    /// Refused: bad input or overload under the reject policy.
    Rejected,
    /// Publishing failed terminally.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Enqueued | Self::Rejected | Self::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_advance_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, Enqueued)
                | (Validated, Rejected)
                | (Validated, Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "RECEIVED"),
            Self::Validated => write!(f, "VALIDATED"),
            Self::Enqueued => write!(f, "ENQUEUED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Attempted an illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// Canonical unit of work flowing through the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// Idempotency and partition key.
    pub id: TransactionId,
    /// Whether `id` was generated by the codec rather than supplied.
    pub id_generated: bool,
    /// Non-negative monetary amount.
    pub amount: Decimal,
    /// Opaque currency code, passed through.
    pub currency: Option<String>,
    /// Every other top-level field, passed through.
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// The original bytes, forwarded to the broker unchanged.
    pub raw_payload: Bytes,
    status: TransactionStatus,
}

impl TransactionRecord {
    /// Builds a record in the `Received` state.
    pub fn received(id: TransactionId, amount: Decimal, raw_payload: Bytes) -> Self {
        Self {
            id,
            id_generated: false,
            amount,
            currency: None,
            attributes: serde_json::Map::new(),
            raw_payload,
            status: TransactionStatus::Received,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Moves the record forward in its lifecycle. Regressions and moves out
    /// of a terminal state are refused and leave the status unchanged.
    pub fn advance(&mut self, next: TransactionStatus) -> Result<(), LifecycleError> {
        if !self.status.can_advance_to(next) {
            return Err(LifecycleError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Codec-only shortcut: a freshly decoded record is always `Validated`.
    pub(crate) fn into_validated(mut self) -> Self {
        self.status = TransactionStatus::Validated;
        self
    }

    /// Size of the payload that will be sent to the broker.
    pub fn payload_len(&self) -> usize {
        self.raw_payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TransactionRecord {
        TransactionRecord::received(
            TransactionId::from("t1"),
            Decimal::new(10_000, 2),
            Bytes::from_static(br#"{"id":"t1","amount":100.00}"#),
        )
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut rec = record();
        assert_eq!(rec.status(), TransactionStatus::Received);
        rec.advance(TransactionStatus::Validated).unwrap();
        rec.advance(TransactionStatus::Enqueued).unwrap();
        assert!(rec.status().is_terminal());
    }

    #[test]
    fn enqueued_never_regresses() {
        let mut rec = record();
        rec.advance(TransactionStatus::Validated).unwrap();
        rec.advance(TransactionStatus::Enqueued).unwrap();

        let err = rec.advance(TransactionStatus::Received).unwrap_err();
        assert_eq!(err.from, TransactionStatus::Enqueued);
        assert_eq!(err.to, TransactionStatus::Received);
        assert_eq!(rec.status(), TransactionStatus::Enqueued);
    }

    #[test]
    fn cannot_enqueue_unvalidated_record() {
        let mut rec = record();
        assert!(rec.advance(TransactionStatus::Enqueued).is_err());
        assert_eq!(rec.status(), TransactionStatus::Received);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            TransactionStatus::Enqueued,
            TransactionStatus::Rejected,
            TransactionStatus::Failed,
        ] {
            for next in [
                TransactionStatus::Received,
                TransactionStatus::Validated,
                TransactionStatus::Enqueued,
                TransactionStatus::Rejected,
                TransactionStatus::Failed,
            ] {
                assert!(!terminal.can_advance_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let json = serde_json::to_string(&TransactionStatus::Enqueued).unwrap();
        assert_eq!(json, "\"ENQUEUED\"");
    }

    #[test]
    fn id_key_is_utf8_bytes() {
        let id = TransactionId::from("tx-9");
        assert_eq!(id.as_key(), b"tx-9");
        assert_eq!(id.to_string(), "tx-9");
    }
}
