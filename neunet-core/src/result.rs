//! Acquisition results and their caller-facing views.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why a completed run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CompletionReason {
    /// The exposure window elapsed.
    WindowElapsed,
    /// The source reported that it will produce no more events.
    SourceExhausted,
    /// The caller requested early termination.
    Cancelled,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::WindowElapsed => "window elapsed",
            Self::SourceExhausted => "source exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunStatus {
    /// The run ended normally.
    Completed(CompletionReason),
    /// The source failed; the histogram is partial.
    Failed {
        /// Source failure message.
        reason: String,
    },
}

impl RunStatus {
    /// Returns true unless the run failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(reason) => write!(f, "completed ({reason})"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Event accounting for one histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AccumulatorStatistics {
    /// Events taken into the run (inside the exposure window).
    pub events_consumed: u64,
    /// Events counted into a histogram bin.
    pub in_range: u64,
    /// Events whose position mapped outside `[0, N)`.
    pub out_of_range: u64,
    /// Events stamped after the exposure window; not consumed.
    pub beyond_window: u64,
}

impl AccumulatorStatistics {
    /// Fraction of consumed events that landed in a bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn in_range_fraction(&self) -> f64 {
        if self.events_consumed == 0 {
            0.0
        } else {
            self.in_range as f64 / self.events_consumed as f64
        }
    }
}

/// Immutable outcome of one acquisition run for one tube.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcquisitionResult {
    /// Wall-clock time at which the run started.
    pub start_time: DateTime<Utc>,
    /// Seconds of exposure actually covered, at most the configured exposure.
    pub elapsed_time: f64,
    /// Per-bin counts in increasing position order.
    pub histogram: Vec<u64>,
    /// Native resolution the histogram was binned from.
    pub resolution: u32,
    /// How the run ended.
    pub status: RunStatus,
    /// Event accounting.
    pub statistics: AccumulatorStatistics,
}

impl AcquisitionResult {
    /// Number of bins.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.histogram.len()
    }

    /// Sum of all bin counts.
    #[must_use]
    pub fn total_counts(&self) -> u64 {
        self.histogram.iter().sum()
    }

    /// Returns true unless the source failed mid-run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Borrowed compatibility view `(start_time, elapsed_time, histogram)`.
    #[must_use]
    pub fn as_tuple(&self) -> (DateTime<Utc>, f64, &[u64]) {
        (self.start_time, self.elapsed_time, &self.histogram)
    }

    /// Owned compatibility view `(start_time, elapsed_time, histogram)`.
    #[must_use]
    pub fn into_tuple(self) -> (DateTime<Utc>, f64, Vec<u64>) {
        (self.start_time, self.elapsed_time, self.histogram)
    }
}

/// Outcome of one acquisition over several tubes sharing a data stream.
///
/// Each tube has its own independent histogram; nothing is combined.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArrayResult {
    /// Wall-clock time at which the run started.
    pub start_time: DateTime<Utc>,
    /// Seconds of exposure actually covered.
    pub elapsed_time: f64,
    /// How the run ended.
    pub status: RunStatus,
    /// One result per requested PSD channel.
    pub detectors: BTreeMap<u8, AcquisitionResult>,
    /// Events on channels that were not requested.
    pub unrouted: u64,
}

impl ArrayResult {
    /// Result for one PSD channel.
    #[must_use]
    pub fn detector(&self, channel: u8) -> Option<&AcquisitionResult> {
        self.detectors.get(&channel)
    }

    /// Returns true unless the source failed mid-run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}

/// Output shape selected by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResultView {
    /// Named fields.
    #[default]
    Structured,
    /// Plain ordered triple `(start_time, elapsed_time, histogram)`.
    Tuple,
}

impl std::str::FromStr for ResultView {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "bluesky" => Ok(Self::Structured),
            "tuple" => Ok(Self::Tuple),
            other => Err(crate::Error::Configuration(format!(
                "unknown result view '{other}'"
            ))),
        }
    }
}

/// Description of one output field for downstream data collectors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDescription {
    /// Field name, e.g. `detector 0`.
    pub name: String,
    /// Origin of the data.
    pub source: String,
    /// `array` or `number`.
    pub dtype: String,
    /// Array shape; empty for scalars.
    pub shape: Vec<usize>,
}

/// Describes the fields produced by an acquisition over `channels`, each
/// histogram being `bin_count` rows of (position, counts).
#[must_use]
pub fn describe(channels: &[u8], bin_count: usize) -> Vec<FieldDescription> {
    let mut fields: Vec<FieldDescription> = channels
        .iter()
        .map(|ch| FieldDescription {
            name: format!("detector {ch}"),
            source: format!("detector {ch}"),
            dtype: "array".to_string(),
            shape: vec![bin_count, 2],
        })
        .collect();
    fields.push(FieldDescription {
        name: "elapsed time".to_string(),
        source: "n/a".to_string(),
        dtype: "number".to_string(),
        shape: Vec::new(),
    });
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AcquisitionResult {
        AcquisitionResult {
            start_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            elapsed_time: 12.5,
            histogram: vec![1, 2, 3],
            resolution: 300,
            status: RunStatus::Completed(CompletionReason::WindowElapsed),
            statistics: AccumulatorStatistics {
                events_consumed: 7,
                in_range: 6,
                out_of_range: 1,
                beyond_window: 0,
            },
        }
    }

    #[test]
    fn test_tuple_view_order() {
        let result = sample();
        let (start, elapsed, histogram) = result.as_tuple();
        assert_eq!(start, result.start_time);
        assert!((elapsed - 12.5).abs() < f64::EPSILON);
        assert_eq!(histogram, &[1, 2, 3]);

        let (_, _, owned) = result.into_tuple();
        assert_eq!(owned, vec![1, 2, 3]);
    }

    #[test]
    fn test_totals_and_status() {
        let result = sample();
        assert_eq!(result.total_counts(), 6);
        assert_eq!(result.bin_count(), 3);
        assert!(result.is_complete());

        let failed = AcquisitionResult {
            status: RunStatus::Failed {
                reason: "socket closed".to_string(),
            },
            ..sample()
        };
        assert!(!failed.is_complete());
        assert_eq!(failed.status.to_string(), "failed (socket closed)");
    }

    #[test]
    fn test_view_parsing() {
        assert_eq!("tuple".parse::<ResultView>().unwrap(), ResultView::Tuple);
        assert_eq!(
            "Bluesky".parse::<ResultView>().unwrap(),
            ResultView::Structured
        );
        assert!("xml".parse::<ResultView>().is_err());
    }

    #[test]
    fn test_describe() {
        let fields = describe(&[0, 7], 350);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].name, "detector 7");
        assert_eq!(fields[1].shape, vec![350, 2]);
        assert_eq!(fields[2].dtype, "number");
    }
}
