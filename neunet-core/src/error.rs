//! Error types for neunet-core.

use thiserror::Error;

/// Result type alias for neunet-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid histogram or detector configuration, raised before a run starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The event source cannot continue (disconnect, timeout, decode failure).
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    /// An accumulator operation was called in the wrong run state.
    #[error("invalid run state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// Histogram data could not be re-binned.
    #[error("rebin error: {0}")]
    Rebin(String),
}

/// Failure of a whole acquisition run.
///
/// Configuration failures happen before anything is consumed. Source failures
/// carry the partial result accumulated so far; it is marked as failed so it
/// can never be mistaken for a complete exposure.
#[derive(Error, Debug)]
pub enum AcquisitionError<T> {
    /// The run never started.
    #[error(transparent)]
    Configuration(Error),

    /// The accumulator was driven out of order, e.g. run a second time.
    #[error(transparent)]
    InvalidState(Error),

    /// The event source failed mid-run.
    #[error("acquisition aborted after {elapsed_time:.3} s: {reason}")]
    SourceUnavailable {
        reason: String,
        elapsed_time: f64,
        partial: Box<T>,
    },
}

impl<T> From<Error> for AcquisitionError<T> {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidState { .. } => Self::InvalidState(err),
            other => Self::Configuration(other),
        }
    }
}

impl<T> AcquisitionError<T> {
    /// Returns the partial result of a failed run, if there is one.
    #[must_use]
    pub fn partial(&self) -> Option<&T> {
        match self {
            Self::Configuration(_) | Self::InvalidState(_) => None,
            Self::SourceUnavailable { partial, .. } => Some(partial),
        }
    }

    /// Consumes the error and returns the partial result, if there is one.
    #[must_use]
    pub fn into_partial(self) -> Option<T> {
        match self {
            Self::Configuration(_) | Self::InvalidState(_) => None,
            Self::SourceUnavailable { partial, .. } => Some(*partial),
        }
    }

    /// Returns true if the run was rejected before any event was consumed.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
