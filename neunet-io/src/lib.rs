//! neunet-io: detector sockets, capture replay and histogram files.
//!
//! # Key Components
//!
//! - [`NeunetClient`] - UDP register access, staging and the TCP event stream
//! - [`PacketStreamSource`] - [`neunet_core::EventSource`] over any byte
//!   stream
//! - [`CaptureFile`] - memory-mapped captured streams for replay
//! - [`save_array`] / [`read_histogram_text`] - plain-text histogram files
//! - [`save_graph`] - SVG chart of counts against position
//! - `hdf5` (feature) - NeXus-style histogram files

mod capture;
mod client;
mod error;
mod graph;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod stream;
mod writer;

pub use capture::{CaptureFile, SharedMmap};
pub use client::{NeunetClient, MAX_RESPONSE_LEN};
pub use error::{Error, Result};
pub use graph::{save_graph, write_graph, GRAPH_SIZE, GRAPH_TITLE};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_histograms_hdf5, write_histograms_hdf5, Hdf5WriteOptions, HistogramFile};
pub use stream::{PacketStreamSource, StreamConfig, StreamStatistics};
pub use writer::{
    read_histogram_text, rebinned_path, save_array, save_array_as, write_histogram,
    write_position_histogram, HistogramWriter, SaveOptions,
};
