//! Error taxonomy shared by the aligner, the sinks and the configuration layer.
//!
//! Recoverable configuration inconsistencies never surface here: they are
//! repaired in [`crate::config`] and reported with `warn!`. What remains are
//! conditions the caller has to act on: skip an event, stop the run, or bail
//! out on I/O.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    /// Configuration that cannot be repaired with a safe default.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The event does not carry the expected per-plane hit lists.
    #[error("event {event}: expected hits for {expected} planes, found {found}")]
    MissingInput {
        event: u64,
        expected: usize,
        found: usize,
    },

    /// The run header declares a different geometry than the one configured.
    #[error("geometry mismatch: configured id {expected}, run header says {found}")]
    GeometryMismatch { expected: i32, found: i32 },

    /// Global track ceiling hit; the whole run has to stop.
    #[error("maximum number of tracks ({limit}) reached, stopping the run")]
    TrackCeilingReached { limit: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AlignError {
    /// Whether the run loop may continue with the next event.
    pub fn is_event_local(&self) -> bool {
        matches!(self, AlignError::MissingInput { .. })
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;
