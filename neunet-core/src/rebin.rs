//! Re-binning of saved position histograms.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A histogram as (position, counts) rows, e.g. read back from a saved file.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PositionHistogram {
    /// Bin positions (typically centres in millimetres).
    pub positions: Vec<f64>,
    /// Counts per bin.
    pub counts: Vec<f64>,
}

impl PositionHistogram {
    /// Creates a histogram from matching position and count columns.
    ///
    /// # Errors
    /// Returns [`Error::Rebin`] if the columns differ in length.
    pub fn new(positions: Vec<f64>, counts: Vec<f64>) -> Result<Self> {
        if positions.len() != counts.len() {
            return Err(Error::Rebin(format!(
                "{} positions but {} counts",
                positions.len(),
                counts.len()
            )));
        }
        Ok(Self { positions, counts })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Total counts.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Sums counts into `bins` equal-width bins spanning the smallest to the
    /// largest position. The last bin includes its right edge. New positions
    /// are the bin midpoints.
    ///
    /// # Errors
    /// Returns [`Error::Rebin`] if the histogram is empty, `bins` is zero or
    /// a position is not finite.
    pub fn rebin(&self, bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(Error::Rebin("bins must be at least 1".to_string()));
        }
        if self.is_empty() {
            return Err(Error::Rebin("cannot rebin an empty histogram".to_string()));
        }
        if self.positions.iter().any(|p| !p.is_finite()) {
            return Err(Error::Rebin("positions must be finite".to_string()));
        }

        let mut lo = self.positions.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = self
            .positions
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;

        let mut counts = vec![0.0; bins];
        for (&position, &count) in self.positions.iter().zip(&self.counts) {
            let index = (((position - lo) / width) as usize).min(bins - 1);
            counts[index] += count;
        }
        let positions = (0..bins)
            .map(|i| lo + (i as f64 + 0.5) * width)
            .collect();

        Ok(Self { positions, counts })
    }
}
