//! Configuration management for the orderstream binaries.
//!
//! Values come from environment variables (after `.env` is loaded) with
//! defaults for local development. Parsing goes through
//! [`Config::from_lookup`] so tests never touch the process environment.

use orderstream_producer::{ProducerSettings, SourceSet};
use orderstream_projections::RunnerSettings;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. Always fatal: the process never starts processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Environment variable
        key: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// The parsed configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Event log connection
    pub log: LogConfig,
    /// Source datasets
    pub sources: SourceConfig,
    /// Producer pacing and sampling
    pub producer: ProducerConfig,
    /// Output locations
    pub sinks: SinkConfig,
    /// Checkpoint backend
    pub checkpoints: CheckpointConfig,
    /// Micro-batch loop
    pub runner: RunnerConfig,
    /// Prometheus listener (disabled when unset)
    pub metrics_addr: Option<SocketAddr>,
}

/// Event log configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Cluster/region identifier, used as the client id prefix
    pub cluster: String,
    /// Topic carrying every envelope
    pub topic: String,
    /// Upper bound of one read in milliseconds
    pub poll_timeout_ms: u64,
    /// Startup probe timeout in milliseconds
    pub probe_timeout_ms: u64,
}

/// Source dataset locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Orders CSV
    pub orders: PathBuf,
    /// Order-items CSV
    pub items: PathBuf,
    /// Payments CSV
    pub payments: PathBuf,
}

/// Producer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Cap on emitted events
    pub max_events: usize,
    /// Pause after each publish in milliseconds
    pub emit_delay_ms: u64,
    /// Progress log interval in events (0 disables)
    pub progress_every: usize,
    /// Seed for a reproducible run
    pub seed: Option<u64>,
}

/// Sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Raw archive directory
    pub raw_dir: PathBuf,
    /// Root of the processed datasets (`orders/`, `items/`, `payments/`)
    pub processed_dir: PathBuf,
}

/// Checkpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Directory for the file backend
    pub dir: PathBuf,
    /// `PostgreSQL` URL; takes precedence over `dir` when set
    pub database_url: Option<String>,
}

/// Runner configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Records per micro-batch
    pub max_batch_records: usize,
    /// Idle wait between empty reads in milliseconds
    pub trigger_interval_ms: u64,
    /// Wait before restarting a failed component in milliseconds
    pub restart_backoff_ms: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result
    /// fails [`Config::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result
    /// fails [`Config::validate`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str, default: &str| PathBuf::from(text(key, default));

        let config = Self {
            log: LogConfig {
                brokers: text("ORDERSTREAM_BROKERS", "localhost:9092"),
                cluster: text("ORDERSTREAM_CLUSTER", "orderstream"),
                topic: text("ORDERSTREAM_TOPIC", "orderstream-events"),
                poll_timeout_ms: parse(&lookup, "ORDERSTREAM_POLL_TIMEOUT_MS")?.unwrap_or(1_000),
                probe_timeout_ms: parse(&lookup, "ORDERSTREAM_PROBE_TIMEOUT_MS")?.unwrap_or(10_000),
            },
            sources: SourceConfig {
                orders: path("ORDERS_CSV", "data/olist_orders_dataset.csv"),
                items: path("ITEMS_CSV", "data/olist_order_items_dataset.csv"),
                payments: path("PAYMENTS_CSV", "data/olist_order_payments_dataset.csv"),
            },
            producer: ProducerConfig {
                max_events: parse(&lookup, "PRODUCER_MAX_EVENTS")?.unwrap_or(50_000),
                emit_delay_ms: parse(&lookup, "PRODUCER_EMIT_DELAY_MS")?.unwrap_or(20),
                progress_every: parse(&lookup, "PRODUCER_PROGRESS_EVERY")?.unwrap_or(10_000),
                seed: parse(&lookup, "PRODUCER_SEED")?,
            },
            sinks: SinkConfig {
                raw_dir: path("RAW_DIR", "data/raw/events"),
                processed_dir: path("PROCESSED_DIR", "data/processed"),
            },
            checkpoints: CheckpointConfig {
                dir: path("CHECKPOINT_DIR", "data/processed/checkpoints"),
                database_url: lookup("CHECKPOINT_DATABASE_URL").filter(|url| !url.trim().is_empty()),
            },
            runner: RunnerConfig {
                max_batch_records: parse(&lookup, "RUNNER_MAX_BATCH_RECORDS")?.unwrap_or(1_000),
                trigger_interval_ms: parse(&lookup, "RUNNER_TRIGGER_INTERVAL_MS")?.unwrap_or(5_000),
                restart_backoff_ms: parse(&lookup, "RUNNER_RESTART_BACKOFF_MS")?.unwrap_or(10_000),
            },
            metrics_addr: parse(&lookup, "METRICS_ADDR")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reject = |message: &str| Err(ConfigError::Validation(message.to_string()));

        if self.log.brokers.trim().is_empty() {
            return reject("log brokers must not be empty");
        }
        if self.log.topic.trim().is_empty() {
            return reject("log topic must not be empty");
        }
        if self.log.poll_timeout_ms == 0 {
            return reject("poll timeout must be greater than zero");
        }
        if self.producer.max_events == 0 {
            return reject("producer max_events must be greater than zero");
        }
        if self.runner.max_batch_records == 0 {
            return reject("runner max_batch_records must be greater than zero");
        }

        let paths = [
            ("orders source", &self.sources.orders),
            ("items source", &self.sources.items),
            ("payments source", &self.sources.payments),
            ("raw sink", &self.sinks.raw_dir),
            ("processed sink", &self.sinks.processed_dir),
            ("checkpoint directory", &self.checkpoints.dir),
        ];
        if let Some((name, _)) = paths.iter().find(|(_, path)| path.as_os_str().is_empty()) {
            return Err(ConfigError::Validation(format!("{name} path must not be empty")));
        }

        Ok(())
    }

    /// Source datasets for the producer.
    #[must_use]
    pub fn source_set(&self) -> SourceSet {
        SourceSet {
            orders: self.sources.orders.clone(),
            items: self.sources.items.clone(),
            payments: self.sources.payments.clone(),
        }
    }

    /// Producer settings.
    #[must_use]
    pub const fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            max_events: self.producer.max_events,
            emit_delay: Duration::from_millis(self.producer.emit_delay_ms),
            progress_every: self.producer.progress_every,
            seed: self.producer.seed,
        }
    }

    /// Micro-batch loop settings shared by every component.
    #[must_use]
    pub const fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            max_batch_records: self.runner.max_batch_records,
            idle_wait: Duration::from_millis(self.runner.trigger_interval_ms),
        }
    }

    /// Wait before a failed component is restarted.
    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.runner.restart_backoff_ms)
    }

    /// Output directory of one processed dataset.
    #[must_use]
    pub fn processed_dir(&self, dataset: &str) -> PathBuf {
        self.sinks.processed_dir.join(dataset)
    }

    /// Checkpoint directory of the file backend.
    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoints.dir
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }),
    }
}
