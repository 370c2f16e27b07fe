//! # Prometheus Metrics
//!
//! Operational metrics for the ingestor, scraped by Prometheus at `/metrics`
//! on the metrics port. [`IngestMetrics`] is registered with the coordinator
//! as its [`IngestObserver`], so every terminal ingestion outcome and every
//! retry lands here without the library knowing about Prometheus.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed with
//! `fraudshield`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use fraudshield_ingest::coordinator::{IngestEvent, IngestObserver};
use fraudshield_ingest::publisher::{PublishError, Publisher};
use fraudshield_ingest::transaction::TransactionId;

/// Holds all Prometheus metric handles for the ingestor.
#[derive(Clone)]
pub struct IngestMetrics {
    registry: Registry,
    /// Terminal outcomes by `result` (accepted, duplicate, rejected,
    /// unavailable) and `reason`.
    pub ingest_results_total: IntCounterVec,
    /// Publish calls made, retries included.
    pub publish_attempts_total: IntCounter,
    /// Retryable failures that were retried.
    pub publish_retries_total: IntCounter,
    /// Sends currently holding an in-flight slot. Refreshed on scrape.
    pub publisher_in_flight: IntGauge,
    /// End-to-end ingestion latency in seconds.
    pub ingest_latency_seconds: Histogram,
}

impl IngestMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("fraudshield".into()), None)
            .expect("failed to create prometheus registry");

        let ingest_results_total = IntCounterVec::new(
            Opts::new(
                "ingest_results_total",
                "Terminal ingestion outcomes by result and reason",
            ),
            &["result", "reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(ingest_results_total.clone()))
            .expect("metric registration");

        let publish_attempts_total = IntCounter::new(
            "publish_attempts_total",
            "Publish calls handed to the broker adapter, retries included",
        )
        .expect("metric creation");
        registry
            .register(Box::new(publish_attempts_total.clone()))
            .expect("metric registration");

        let publish_retries_total = IntCounter::new(
            "publish_retries_total",
            "Retryable publish failures that were retried after backoff",
        )
        .expect("metric creation");
        registry
            .register(Box::new(publish_retries_total.clone()))
            .expect("metric registration");

        let publisher_in_flight = IntGauge::new(
            "publisher_in_flight",
            "Broker sends currently holding an in-flight slot",
        )
        .expect("metric creation");
        registry
            .register(Box::new(publisher_in_flight.clone()))
            .expect("metric registration");

        let ingest_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ingest_latency_seconds",
                "End-to-end ingestion latency in seconds, retries included",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(ingest_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            ingest_results_total,
            publish_attempts_total,
            publish_retries_total,
            publisher_in_flight,
            ingest_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl IngestObserver for IngestMetrics {
    fn on_terminal(&self, event: &IngestEvent) {
        self.ingest_results_total
            .with_label_values(&[event.label(), event.reason()])
            .inc();
        self.publish_attempts_total.inc_by(u64::from(event.attempts));
        self.ingest_latency_seconds
            .observe(event.elapsed.as_secs_f64());
    }

    fn on_retry(&self, id: &TransactionId, attempt: u32, delay: Duration, error: &PublishError) {
        self.publish_retries_total.inc();
        tracing::debug!(%id, attempt, delay_ms = delay.as_millis() as u64, %error, "publish retry scheduled");
    }
}

pub type SharedMetrics = Arc<IngestMetrics>;

/// State of the metrics server.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: SharedMetrics,
    pub publisher: Arc<Publisher>,
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state
        .metrics
        .publisher_in_flight
        .set(state.publisher.in_flight() as i64);

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraudshield_ingest::publisher::PublishOutcome;
    use fraudshield_ingest::transaction::TransactionStatus;

    fn event(status: TransactionStatus, outcome: Option<PublishOutcome>, attempts: u32) -> IngestEvent {
        IngestEvent {
            id: Some(TransactionId::from("t1")),
            status,
            outcome,
            attempts,
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn observer_counts_outcomes_by_label() {
        let metrics = IngestMetrics::new();
        metrics.on_terminal(&event(
            TransactionStatus::Enqueued,
            Some(PublishOutcome::Acknowledged {
                partition: 0,
                offset: 0,
            }),
            3,
        ));
        metrics.on_terminal(&event(
            TransactionStatus::Rejected,
            Some(PublishOutcome::Rejected {
                reason: "INVALID_AMOUNT",
            }),
            0,
        ));

        assert_eq!(
            metrics
                .ingest_results_total
                .with_label_values(&["accepted", "ACKNOWLEDGED"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .ingest_results_total
                .with_label_values(&["rejected", "INVALID_AMOUNT"])
                .get(),
            1
        );
        assert_eq!(metrics.publish_attempts_total.get(), 3);
        assert_eq!(metrics.ingest_latency_seconds.get_sample_count(), 2);
    }

    #[test]
    fn encode_uses_fraudshield_prefix() {
        let metrics = IngestMetrics::new();
        metrics.on_terminal(&event(TransactionStatus::Enqueued, None, 0));
        let text = metrics.encode().unwrap();
        assert!(text.contains("fraudshield_ingest_results_total"));
        assert!(text.contains("reason=\"DUPLICATE\""));
    }
}
