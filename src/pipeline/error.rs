//! Error types and reporting for pipeline stations.

use crate::error::{ErrorKind, VoxloopError};
use thiserror::Error;

/// Errors that can occur while a station processes one item.
#[derive(Debug, Clone, Error)]
pub enum StationError {
    /// The item is dropped; the station keeps processing.
    #[error("Recoverable error: {0}")]
    Recoverable(String),
    /// The station shuts down.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

impl From<VoxloopError> for StationError {
    /// Capability failures are per-item and recoverable; everything else ends
    /// the station.
    fn from(error: VoxloopError) -> Self {
        match error.kind() {
            ErrorKind::Capability => StationError::Recoverable(error.to_string()),
            _ => StationError::Fatal(error.to_string()),
        }
    }
}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that forwards station errors to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{msg}"),
            StationError::Fatal(msg) => tracing::error!(station, "{msg}"),
        }
    }
}
