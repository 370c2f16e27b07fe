//! # REST API
//!
//! Builds the axum router that exposes the ingestion gateway over HTTP. The
//! handlers are thin: they pass raw bytes to [`IngestGateway`] and copy its
//! response onto the wire.
//!
//! ## Endpoints
//!
//! | Method | Path            | Description                                |
//! |--------|-----------------|--------------------------------------------|
//! | GET    | `/health`       | Liveness probe                             |
//! | GET    | `/status`       | Publisher and configuration snapshot       |
//! | GET    | `/transactions` | Static sample acknowledgment               |
//! | POST   | `/transactions` | Ingest one transaction (raw JSON body)     |

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fraudshield_ingest::gateway::{GatewayResponse, IngestGateway};
use fraudshield_ingest::publisher::{Publisher, PublisherStats};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ingestor's reported version string.
    pub version: String,
    /// Broker the publisher is connected to.
    pub broker_address: String,
    /// Request bodies above this size are refused with 413.
    pub max_body_bytes: usize,
    pub gateway: Arc<IngestGateway>,
    pub publisher: Arc<Publisher>,
    pub started_at: DateTime<Utc>,
}

/// Response body for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub broker: String,
    pub publisher: PublisherStats,
    pub uptime_secs: i64,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS, tracing and a body size limit.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transactions", get(sample_handler).post(accept_handler))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: liveness probe.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: publisher snapshot.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    Json(StatusResponse {
        version: state.version.clone(),
        broker: state.broker_address.clone(),
        publisher: state.publisher.stats(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

/// `GET /transactions`: static sample, no side effects.
async fn sample_handler(State(state): State<AppState>) -> Response {
    into_http(state.gateway.health())
}

/// `POST /transactions`: ingest the raw body.
async fn accept_handler(State(state): State<AppState>, body: Bytes) -> Response {
    into_http(state.gateway.accept(&body).await)
}

/// Copies a gateway response onto an HTTP response.
fn into_http(resp: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(resp.status_hint).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(resp.body)).into_response();
    if let Some(retry_after) = resp.retry_after {
        let secs = retry_after.as_secs().max(1);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}
