//! NEUNET protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer bytes than the message needs.
    #[error("truncated message: expected {expected} bytes, got {found}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        found: usize,
    },

    /// The board flagged a bus error in its register response.
    #[error("register bus error, response header {0:02x?}")]
    BusError([u8; 8]),

    /// A register request that cannot be encoded.
    #[error("invalid register request: {0}")]
    InvalidRequest(String),

    /// Instrument time outside the representable range.
    #[error("instrument time out of range: {0}")]
    TimeOutOfRange(String),

    /// Resolution mode other than 12 or 14 bits.
    #[error("unsupported resolution mode: {0} bits")]
    UnsupportedResolution(u8),

    /// Detector configuration failed validation.
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
