//! Producer errors.

use orderstream_core::event::EnvelopeError;
use orderstream_core::event_bus::LogError;
use thiserror::Error;

/// Errors that abort a producer run.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// A source dataset could not be read.
    #[error("Failed to read source '{path}': {reason}")]
    Source {
        /// Dataset location
        path: String,
        /// Reader message
        reason: String,
    },

    /// An envelope could not be serialized.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The log rejected an envelope. The run stops at the first failure.
    #[error("Publish failed after {emitted} events: {source}")]
    Publish {
        /// Events successfully published before the failure
        emitted: usize,
        /// Log client error
        source: LogError,
    },
}
