//! # Ingestion Gateway
//!
//! The accept/respond contract seen by clients. Transport-agnostic: it hands
//! back a status hint, a JSON body and an optional retry-after, and the HTTP
//! layer in the node crate copies them onto the wire.
//!
//! | Result                         | Status | Body                                   |
//! |--------------------------------|--------|----------------------------------------|
//! | Accepted, acknowledged         | 200    | `{"status":"sent","id":..}`            |
//! | Accepted, pending              | 202    | `{"status":"received","id":..}`        |
//! | Accepted, duplicate            | 200    | `{"status":"received","duplicate":true}` |
//! | Rejected, validation           | 400    | `{"status":"rejected","reason":..}`    |
//! | Rejected, `QUEUE_FULL`         | 429    | `{"status":"rejected","reason":..}`    |
//! | Unavailable, `FATAL`           | 500    | `{"status":"unavailable","reason":..}` |
//! | Unavailable, anything else     | 503    | `{"status":"unavailable","reason":..}` |

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::coordinator::{Delivery, IngestCoordinator, IngestResult, RejectReason, UnavailableReason};

/// Retry-after hint attached to 429 and 503 responses.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status_hint: u16,
    pub body: Value,
    pub retry_after: Option<Duration>,
}

pub struct IngestGateway {
    coordinator: Arc<IngestCoordinator>,
    retry_after: Duration,
}

impl IngestGateway {
    pub fn new(coordinator: Arc<IngestCoordinator>) -> Self {
        Self {
            coordinator,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn coordinator(&self) -> &Arc<IngestCoordinator> {
        &self.coordinator
    }

    /// Static sample acknowledgment. Touches nothing.
    pub fn health(&self) -> GatewayResponse {
        GatewayResponse {
            status_hint: 200,
            body: json!({ "id": 1, "amount": 100.0, "status": "OK" }),
            retry_after: None,
        }
    }

    /// Ingests `raw` and maps the result to a response.
    pub async fn accept(&self, raw: &[u8]) -> GatewayResponse {
        let result = self.coordinator.ingest(raw).await;
        respond(&result, self.retry_after)
    }
}

/// Pure mapping from an ingestion result to a response.
pub fn respond(result: &IngestResult, retry_after: Duration) -> GatewayResponse {
    match result {
        IngestResult::Accepted { id, delivery } => {
            let (status_hint, body) = match delivery {
                Delivery::Acknowledged { .. } => (200, json!({ "status": "sent", "id": id })),
                Delivery::Pending { .. } => (202, json!({ "status": "received", "id": id })),
                Delivery::Duplicate => (
                    200,
                    json!({ "status": "received", "id": id, "duplicate": true }),
                ),
            };
            GatewayResponse {
                status_hint,
                body,
                retry_after: None,
            }
        }
        IngestResult::Rejected { reason, detail } => {
            let (status_hint, retry_after) = match reason {
                RejectReason::Validation(_) => (400, None),
                RejectReason::QueueFull => (429, Some(retry_after)),
            };
            GatewayResponse {
                status_hint,
                body: json!({ "status": "rejected", "reason": reason.code(), "detail": detail }),
                retry_after,
            }
        }
        IngestResult::Unavailable { reason, detail } => {
            let (status_hint, retry_after) = match reason {
                UnavailableReason::Fatal => (500, None),
                _ => (503, Some(retry_after)),
            };
            GatewayResponse {
                status_hint,
                body: json!({ "status": "unavailable", "reason": reason.code(), "detail": detail }),
                retry_after,
            }
        }
    }
}
