// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # FraudShield Ingestor
//!
//! Entry point for the `fraudshield-ingestor` binary. Parses CLI arguments,
//! initializes logging and metrics, connects the publisher to the broker,
//! and serves the transaction API until a shutdown signal arrives.
//!
//! The binary supports four subcommands:
//!
//! - `run`:      start the ingestion gateway
//! - `config`:   print the effective configuration
//! - `validate`: decode a payload file offline
//! - `version`:  print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use fraudshield_ingest::broker::{partition_for, InMemoryBroker};
use fraudshield_ingest::coordinator::{CoordinatorConfig, IngestCoordinator};
use fraudshield_ingest::gateway::IngestGateway;
use fraudshield_ingest::publisher::Publisher;
use fraudshield_ingest::transaction::decode;

use cli::{Commands, IngestorCli};
use metrics::{IngestMetrics, MetricsState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = IngestorCli::parse();

    match cli.command {
        Commands::Run(args) => run_ingestor(args).await,
        Commands::Config(args) => print_config(args),
        Commands::Validate(args) => validate_payload(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the gateway: publisher, coordinator, API server and metrics
/// endpoint. Drains in-flight publishes before exiting.
async fn run_ingestor(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format)?;

    let config = args
        .ingest_config()
        .context("invalid ingestion configuration")?;

    tracing::info!(
        broker = %config.broker_address,
        topic = %config.topic,
        in_flight_limit = config.in_flight_limit,
        http_port = args.http_port,
        metrics_port = args.metrics_port,
        "starting fraudshield-ingestor"
    );

    // --- Broker & publisher ---
    let broker = InMemoryBroker::new(
        config.memory_broker_name()?,
        &config.topic,
        config.partitions,
    );
    let publisher = Arc::new(
        Publisher::connect(&broker, config.publisher_config())
            .await
            .with_context(|| format!("failed to connect to broker {}", config.broker_address))?,
    );

    // --- Metrics ---
    let ingest_metrics = Arc::new(IngestMetrics::new());

    // --- Pipeline ---
    let coordinator = Arc::new(
        IngestCoordinator::new(publisher.clone(), CoordinatorConfig::from(&config))
            .with_observer(ingest_metrics.clone()),
    );
    let gateway = Arc::new(IngestGateway::new(coordinator));

    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        broker_address: config.broker_address.clone(),
        max_body_bytes: config.max_message_bytes,
        gateway,
        publisher: publisher.clone(),
        started_at: chrono::Utc::now(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.http_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(MetricsState {
            metrics: ingest_metrics,
            publisher: publisher.clone(),
        });
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining in-flight publishes");
        }
    }

    let report = publisher.close(config.shutdown_grace()).await;
    tracing::info!(
        drained = report.drained,
        abandoned = report.abandoned,
        flushed = report.flushed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        messages = broker.message_count(),
        "fraudshield-ingestor stopped"
    );
    Ok(())
}

/// Prints the resolved configuration as TOML.
fn print_config(args: cli::RunArgs) -> Result<()> {
    let config = args.ingest_config()?;
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

/// Decodes a payload offline and reports the id, amount and partition it
/// would be published with.
fn validate_payload(args: cli::ValidateArgs) -> Result<()> {
    let raw = if args.file == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read(&args.file)
            .with_context(|| format!("failed to read payload {}", args.file.display()))?
    };

    match decode(&raw) {
        Ok(record) => {
            let summary = serde_json::json!({
                "valid": true,
                "id": record.id,
                "id_generated": record.id_generated,
                "amount": record.amount.to_string(),
                "currency": record.currency,
                "partition": partition_for(record.id.as_key(), args.partitions),
                "bytes": record.payload_len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => bail!("payload rejected: {} ({})", err.reason.code(), err.detail),
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("fraudshield-ingestor {}", env!("CARGO_PKG_VERSION"));
    println!("rustc                {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
