//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Operation the board or configuration does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The board answered with the wrong request id or address.
    #[error("unexpected register response: {0}")]
    UnexpectedResponse(String),

    /// Chart rendering failed.
    #[error("graph error: {0}")]
    Graph(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Proto(#[from] neunet_proto::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] neunet_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
