//! `MicroBatchRunner` drives one log subscriber through its lifecycle.
//!
//! # Overview
//!
//! The runner owns everything a subscriber needs to make progress on its own:
//! a log reader, a checkpoint store entry, and a [`BatchHandler`] (the raw
//! archiver or a domain projector). It never shares any of them with another
//! component.
//!
//! # State Machine
//!
//! ```text
//!              ┌────────────┐  checkpoint loaded,   ┌────────────┐  shutdown  ┌─────────┐
//!  run() ────► │  STARTING  │ ────────────────────► │ PROCESSING │ ─────────► │ STOPPED │
//!              └────────────┘  handler recovered    └─────┬──────┘            └─────────┘
//!                    │                                    │ log/sink/checkpoint error
//!                    └──────────────┬─────────────────────┘
//!                                   ▼
//!                              ┌────────┐
//!                              │ FAILED │ ── run() again re-enters STARTING
//!                              └────────┘
//! ```
//!
//! # Micro-batch Loop
//!
//! 1. Read up to `max_batch_records` records from the committed position
//! 2. If nothing arrived, wait `idle_wait` (or until shutdown) and read again
//! 3. Hand the records to the handler under the next batch id
//! 4. Save the checkpoint only after the handler reports the write durable
//!
//! Shutdown is only observed between batches, so an in-flight batch always
//! finishes writing and checkpointing first.

use crate::error::PipelineError;
use orderstream_core::environment::Clock;
use orderstream_core::event_bus::{LogPosition, LogReader, LogRecord};
use orderstream_core::projection::{Checkpoint, CheckpointError, CheckpointStore};
use orderstream_core::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle state of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Loading the checkpoint and reconciling the sink.
    Starting,
    /// Steady-state micro-batch loop.
    Processing,
    /// Stopped after a shutdown request.
    Stopped,
    /// Stopped by an unrecoverable error in this run.
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Processing => "PROCESSING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What happened to the records of one micro-batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records delivered by the log.
    pub read: usize,
    /// Records of another variant, skipped without side effects.
    pub ignored: usize,
    /// Records written to the sink.
    pub written: usize,
    /// Dropped records by reason (`malformed`, `duplicate`, rejection labels).
    pub dropped: BTreeMap<&'static str, usize>,
}

impl BatchStats {
    /// Stats for a batch of `read` records, nothing processed yet.
    #[must_use]
    pub fn new(read: usize) -> Self {
        Self {
            read,
            ..Self::default()
        }
    }

    /// Count one dropped record.
    pub fn drop_record(&mut self, reason: &'static str) {
        *self.dropped.entry(reason).or_insert(0) += 1;
    }

    /// Number of records dropped for `reason`.
    #[must_use]
    pub fn dropped(&self, reason: &str) -> usize {
        self.dropped.get(reason).copied().unwrap_or(0)
    }
}

/// Per-component batch logic driven by [`MicroBatchRunner`].
pub trait BatchHandler: Send {
    /// Component id, also the checkpoint key.
    fn component(&self) -> &str;

    /// Reconcile output with the last committed batch (`None`: nothing
    /// committed yet). Called on every entry into `STARTING`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the sink cannot be reconciled.
    fn recover(
        &mut self,
        committed: Option<u64>,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Process and durably write one micro-batch.
    ///
    /// Must be idempotent for a given `batch_id`: a replay after a crash
    /// between write and checkpoint has to produce the same output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the write is not durable.
    fn handle_batch(
        &mut self,
        batch_id: u64,
        records: &[LogRecord],
        ingested_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<BatchStats, PipelineError>> + Send;
}

/// Tuning for the micro-batch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Upper bound of records per micro-batch.
    pub max_batch_records: usize,
    /// Wait between reads when the log has no new data.
    pub idle_wait: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_batch_records: 1000,
            idle_wait: Duration::from_secs(5),
        }
    }
}

impl RunnerSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.max_batch_records == 0 {
            return Err(PipelineError::Config(
                "max_batch_records must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs one component's micro-batch loop.
///
/// # Example
///
/// ```ignore
/// let (mut runner, shutdown) = MicroBatchRunner::new(
///     DomainProjector::new(OrdersProjection, sink),
///     Box::new(log.reader("orders").await?),
///     checkpoints,
///     Arc::new(SystemClock),
/// );
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.send(true).ok();
/// });
///
/// runner.run().await?;
/// ```
pub struct MicroBatchRunner<H: BatchHandler> {
    handler: H,
    reader: Box<dyn LogReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ComponentState>,
}

impl<H: BatchHandler> MicroBatchRunner<H> {
    /// Create a runner.
    ///
    /// Returns the runner and a shutdown sender. Send `true` to stop the
    /// runner after its in-flight batch.
    #[must_use]
    pub fn new(
        handler: H,
        reader: Box<dyn LogReader>,
        checkpoints: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(ComponentState::Starting);

        let runner = Self {
            handler,
            reader,
            checkpoints,
            clock,
            settings: RunnerSettings::default(),
            shutdown: shutdown_rx,
            state,
        };

        (runner, shutdown_tx)
    }

    /// Replace the loop settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Component id of the wrapped handler.
    #[must_use]
    pub fn component(&self) -> &str {
        self.handler.component()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ComponentState> {
        self.state.subscribe()
    }

    /// The wrapped handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until shutdown (`Ok`, state `STOPPED`) or an error (`Err`, state
    /// `FAILED`).
    ///
    /// Calling `run` again after a failure restarts from the last committed
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the log, sink, or checkpoint store fails,
    /// or if the stored checkpoint is unusable.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        self.transition(ComponentState::Starting);

        match self.process().await {
            Ok(()) => {
                self.transition(ComponentState::Stopped);
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    component = %self.handler.component(),
                    error = %error,
                    recoverable = error.is_recoverable(),
                    "Component failed"
                );
                self.transition(ComponentState::Failed);
                Err(error)
            }
        }
    }

    #[allow(clippy::cognitive_complexity)]
    async fn process(&mut self) -> Result<(), PipelineError> {
        self.settings.validate()?;
        let component = self.handler.component().to_string();

        let checkpoint = self.checkpoints.load(&component).await?;
        let committed = checkpoint.as_ref().map(|c| c.batch_id);
        let (mut batch_id, mut position) = match checkpoint {
            Some(checkpoint) => {
                tracing::info!(
                    component = %component,
                    batch_id = checkpoint.batch_id,
                    committed_at = %checkpoint.committed_at,
                    "Resuming from checkpoint"
                );
                let next = checkpoint.batch_id.checked_add(1).ok_or_else(|| {
                    CheckpointError::Corrupted {
                        component: component.clone(),
                        reason: format!("batch id {} cannot advance", checkpoint.batch_id),
                    }
                })?;
                (next, checkpoint.position)
            }
            None => {
                tracing::info!(component = %component, "Starting from earliest position");
                (0, LogPosition::earliest())
            }
        };

        self.handler.recover(committed).await?;
        self.transition(ComponentState::Processing);

        loop {
            if *self.shutdown.borrow() {
                tracing::info!(component = %component, "Shutdown signal received");
                return Ok(());
            }

            let batch = match self
                .reader
                .read(&position, self.settings.max_batch_records)
                .await
            {
                Ok(batch) => batch,
                Err(error) if error.is_timeout() => {
                    tracing::warn!(component = %component, error = %error, "Log read timed out, retrying");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            if batch.is_empty() {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.idle_wait) => {}
                    Ok(()) = self.shutdown.changed() => {}
                }
                continue;
            }

            let ingested_at = self.clock.now();
            let stats = self
                .handler
                .handle_batch(batch_id, &batch.records, ingested_at)
                .await?;

            let checkpoint = Checkpoint::new(
                component.clone(),
                batch_id,
                batch.next_position.clone(),
                self.clock.now(),
            );
            self.checkpoints.save(&checkpoint).await?;

            record_metrics(&component, &stats);
            tracing::debug!(
                component = %component,
                batch_id = batch_id,
                read = stats.read,
                ignored = stats.ignored,
                written = stats.written,
                dropped = ?stats.dropped,
                "Batch committed"
            );

            position = batch.next_position;
            batch_id += 1;
        }
    }

    fn transition(&self, next: ComponentState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(
                component = %self.handler.component(),
                from = %previous,
                to = %next,
                "Component state changed"
            );
        }
    }
}

fn record_metrics(component: &str, stats: &BatchStats) {
    metrics::counter!("orderstream_batches_processed_total", "component" => component.to_string())
        .increment(1);
    metrics::counter!("orderstream_records_written_total", "component" => component.to_string())
        .increment(stats.written as u64);
    for (reason, count) in &stats.dropped {
        metrics::counter!(
            "orderstream_records_dropped_total",
            "component" => component.to_string(),
            "reason" => *reason
        )
        .increment(*count as u64);
    }
}
