//! # CLI Interface
//!
//! Defines the command-line argument structure for `fraudshield-ingestor`
//! using `clap` derive. Supports four subcommands: `run`, `config`,
//! `validate`, and `version`.
//!
//! Ingestion settings resolve in three layers, later layers winning:
//! built-in defaults, the optional TOML file given by `--config`, then
//! individual flags (or their `FRAUDSHIELD_*` environment variables).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

use fraudshield_ingest::broker::AckMode;
use fraudshield_ingest::config::{BackpressureMode, IngestConfig};
use fraudshield_ingest::coordinator::OverloadPolicy;

use crate::logging::LogFormat;

/// FraudShield transaction ingestor.
///
/// Accepts transaction records over HTTP, validates them, and hands them to
/// the event bus for asynchronous fraud analysis.
#[derive(Parser, Debug)]
#[command(
    name = "fraudshield-ingestor",
    about = "FraudShield transaction ingestion gateway",
    version,
    propagate_version = true
)]
pub struct IngestorCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the ingestor binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ingestion gateway.
    Run(RunArgs),
    /// Print the effective ingestion configuration as TOML and exit.
    Config(RunArgs),
    /// Decode a payload file offline and report what the gateway would do.
    Validate(ValidateArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` and `config` subcommands.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Path to an ingestion configuration file (TOML).
    #[arg(long, short = 'c', env = "FRAUDSHIELD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the HTTP listeners bind to.
    #[arg(long, env = "FRAUDSHIELD_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the transaction API.
    #[arg(long, env = "FRAUDSHIELD_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "FRAUDSHIELD_METRICS_PORT", default_value_t = 9464)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "FRAUDSHIELD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[arg(
        long,
        env = "FRAUDSHIELD_LOG_LEVEL",
        default_value = "fraudshield_node=info,fraudshield_ingest=info,tower_http=info"
    )]
    pub log_level: String,

    /// Broker address, e.g. `memory://local`.
    #[arg(long, env = "FRAUDSHIELD_BROKER")]
    pub broker_address: Option<String>,

    /// Topic transactions are published to.
    #[arg(long, env = "FRAUDSHIELD_TOPIC")]
    pub topic: Option<String>,

    /// Partition count of the in-process broker.
    #[arg(long, env = "FRAUDSHIELD_PARTITIONS")]
    pub partitions: Option<u32>,

    /// Maximum concurrent publishes.
    #[arg(long, env = "FRAUDSHIELD_IN_FLIGHT_LIMIT")]
    pub in_flight_limit: Option<usize>,

    /// `fail_fast` or `wait` when the in-flight limit is reached.
    #[arg(long, env = "FRAUDSHIELD_BACKPRESSURE", value_parser = parse_snake::<BackpressureMode>)]
    pub backpressure: Option<BackpressureMode>,

    /// Maximum wait for an in-flight slot, in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_QUEUE_WAIT_MS")]
    pub queue_wait_ms: Option<u64>,

    /// `leader` (wait for durability) or `none`.
    #[arg(long, env = "FRAUDSHIELD_ACK_MODE", value_parser = parse_snake::<AckMode>)]
    pub ack_mode: Option<AckMode>,

    /// Per-send deadline in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// Total publish attempts per transaction.
    #[arg(long, env = "FRAUDSHIELD_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// First backoff delay in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_BACKOFF_BASE_MS")]
    pub backoff_base_ms: Option<u64>,

    /// Backoff cap in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_BACKOFF_MAX_MS")]
    pub backoff_max_ms: Option<u64>,

    /// Deadline for one ingestion call in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Drain period at shutdown in milliseconds.
    #[arg(long, env = "FRAUDSHIELD_SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: Option<u64>,

    /// `unavailable` (503) or `reject` (429) when saturated.
    #[arg(long, env = "FRAUDSHIELD_OVERLOAD_POLICY", value_parser = parse_snake::<OverloadPolicy>)]
    pub overload_policy: Option<OverloadPolicy>,

    /// Dedup window in milliseconds; zero disables dedup.
    #[arg(long, env = "FRAUDSHIELD_DEDUP_WINDOW_MS")]
    pub dedup_window_ms: Option<u64>,
}

impl RunArgs {
    /// Resolves defaults, the config file and flag overrides into a
    /// validated [`IngestConfig`].
    pub fn ingest_config(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_file(path)?,
            None => IngestConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &self.$field {
                    config.$field = value.clone();
                })*
            };
        }
        apply!(
            broker_address,
            topic,
            partitions,
            in_flight_limit,
            backpressure,
            queue_wait_ms,
            ack_mode,
            send_timeout_ms,
            retry_attempts,
            backoff_base_ms,
            backoff_max_ms,
            request_timeout_ms,
            shutdown_grace_ms,
            overload_policy,
            dedup_window_ms,
        );

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the `validate` subcommand.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Payload file to decode; `-` reads stdin.
    pub file: PathBuf,

    /// Partition count used to report where the payload would land.
    #[arg(long, default_value_t = fraudshield_ingest::config::DEFAULT_PARTITIONS)]
    pub partitions: u32,
}

/// Reads an [`IngestConfig`] from a TOML file. Missing keys take defaults.
pub fn load_config_file(path: &Path) -> Result<IngestConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Parses a snake_case enum value the same way the config file does.
fn parse_snake<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}
