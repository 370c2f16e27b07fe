// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # FraudShield Ingest: Core Library
//!
//! Accepts financial transaction payloads and hands them to the event bus
//! that feeds asynchronous fraud analysis. Scoring happens downstream; this
//! crate's job is to never lose an accepted transaction, never publish a
//! malformed one, and always tell the caller which of the two happened.
//!
//! ## Architecture
//!
//! Leaf-first:
//!
//! - **transaction**: The canonical record and the envelope codec.
//! - **broker**: Session traits for the event bus, partition routing, and an
//!   in-process broker.
//! - **publisher**: Bounded, cancellation-safe hand-off with failure
//!   classification.
//! - **coordinator**: Retry, backpressure and dedup policy; the only place
//!   that decides what a failure means.
//! - **gateway**: Maps ingestion results to caller-visible responses.
//! - **config**: Defaults and the process-wide `IngestConfig`.
//!
//! ## Delivery
//!
//! At-least-once. A retry after an ambiguous failure may publish the same
//! transaction twice; both copies carry the same key and land in the same
//! partition, so consumers deduplicate on the transaction id.

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod publisher;
pub mod transaction;

pub use config::IngestConfig;
pub use coordinator::{IngestCoordinator, IngestResult};
pub use gateway::{GatewayResponse, IngestGateway};
pub use publisher::{Publisher, TransactionPublisher};
