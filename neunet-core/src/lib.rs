//! neunet-core: position histogram acquisition for linear ³He PSD tubes.
//!
//! This crate holds the hardware-independent part of the pipeline: the
//! [`EventSource`] contract, position binning, the exposure-bounded
//! [`HistogramAccumulator`] and the immutable [`AcquisitionResult`] it
//! produces.
//!
//! ```
//! use neunet_core::{acquire, CancelToken, HistogramConfig, UniformSource};
//!
//! let mut source = UniformSource::new(35_000, 1000, 30.0);
//! let config = HistogramConfig::new(30.0, 350);
//! let result = acquire(&mut source, config, &CancelToken::new()).unwrap();
//! assert_eq!(result.total_counts(), 1000);
//! ```

pub mod accumulator;
pub mod binning;
pub mod config;
pub mod error;
pub mod event;
pub mod rebin;
pub mod result;
pub mod sanity;
pub mod simulate;

pub use accumulator::{
    acquire, acquire_array, ArrayAccumulator, CancelToken, HistogramAccumulator, Placement,
    RunState,
};
pub use binning::{BinMapper, DetectorGeometry};
pub use config::{HistogramConfig, DEFAULT_BIN_COUNT};
pub use error::{AcquisitionError, Error, Result};
pub use event::{DetectionEvent, EventBatch, EventSource};
pub use rebin::PositionHistogram;
pub use result::{
    describe, AccumulatorStatistics, AcquisitionResult, ArrayResult, CompletionReason,
    FieldDescription, ResultView, RunStatus,
};
pub use sanity::{sanity_check, sanity_check_with_samples, SanityReport};
pub use simulate::{ScriptedSource, UniformSource};
