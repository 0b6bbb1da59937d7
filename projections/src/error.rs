//! Runner-level errors.

use orderstream_core::event_bus::LogError;
use orderstream_core::projection::{CheckpointError, SinkError};
use thiserror::Error;

/// Error that moves a component to `FAILED`.
///
/// Per-record problems never become a `PipelineError`; they are
/// [`Rejection`](orderstream_core::projection::Rejection)s counted inside the
/// batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The log client failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The checkpoint store failed or holds an unusable checkpoint.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The component was constructed with unusable settings.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether restarting the component (re-entering `STARTING`) can help.
    ///
    /// Checkpoint corruption, a checkpoint the log cannot serve, and
    /// configuration errors need an operator.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Log(e) => !matches!(e, LogError::InvalidPosition(_)),
            Self::Checkpoint(e) => !e.needs_operator(),
            Self::Sink(e) => !matches!(e, SinkError::Corrupted { .. }),
            Self::Config(_) => false,
        }
    }
}
