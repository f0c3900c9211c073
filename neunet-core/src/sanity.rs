//! Hardware-free self test of the bin mapping.
//!
//! Feeds synthetic positions evenly spanning `[0, R)` through a
//! [`BinMapper`] and checks that every index stays inside `[0, N)`, that the
//! mapping never decreases, and that no bin is left empty.
#![allow(clippy::cast_possible_truncation)]

use crate::binning::BinMapper;
use crate::Result;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of a sanity check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SanityReport {
    /// Native resolution R under test.
    pub resolution: u32,
    /// Number of bins N under test.
    pub bin_count: usize,
    /// Synthetic positions fed through the mapper.
    pub samples: u64,
    /// Counts per bin.
    pub histogram: Vec<u64>,
    /// Samples that mapped outside `[0, N)`.
    pub out_of_range: u64,
    /// Whether bin indices never decreased with increasing position.
    pub monotonic: bool,
    /// Bins that received no samples.
    pub empty_bins: Vec<usize>,
}

impl SanityReport {
    /// Returns true if every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.out_of_range == 0 && self.monotonic && self.empty_bins.is_empty()
    }

    /// Smallest and largest per-bin count.
    #[must_use]
    pub fn count_range(&self) -> (u64, u64) {
        let min = self.histogram.iter().copied().min().unwrap_or(0);
        let max = self.histogram.iter().copied().max().unwrap_or(0);
        (min, max)
    }
}

/// The `i`-th of `samples` positions spread evenly over `[0, resolution)`.
#[inline]
fn synthetic_position(i: u64, samples: u64, resolution: u32) -> u32 {
    (u128::from(i) * u128::from(resolution) / u128::from(samples)) as u32
}

/// Checks the mapping with one sample per position code.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if `resolution` and `bin_count`
/// do not form a valid mapping.
pub fn sanity_check(resolution: u32, bin_count: usize) -> Result<SanityReport> {
    sanity_check_with_samples(resolution, bin_count, u64::from(resolution))
}

/// Checks the mapping with `samples` evenly spaced positions.
///
/// With fewer samples than bins some bins are necessarily empty and the
/// report fails.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if `resolution` and `bin_count`
/// do not form a valid mapping or `samples` is zero.
pub fn sanity_check_with_samples(
    resolution: u32,
    bin_count: usize,
    samples: u64,
) -> Result<SanityReport> {
    let mapper = BinMapper::new(resolution, bin_count)?;
    if samples == 0 {
        return Err(crate::Error::Configuration(
            "sanity check needs at least one sample".to_string(),
        ));
    }

    let index_of = |i: u64| mapper.map(synthetic_position(i, samples, resolution));

    let (histogram, out_of_range) = (0..samples)
        .into_par_iter()
        .fold(
            || (vec![0u64; bin_count], 0u64),
            |(mut counts, mut dropped), i| {
                match index_of(i) {
                    Some(bin) => counts[bin] += 1,
                    None => dropped += 1,
                }
                (counts, dropped)
            },
        )
        .reduce(
            || (vec![0u64; bin_count], 0u64),
            |(mut a, da), (b, db)| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                (a, da + db)
            },
        );

    let monotonic = (1..samples).into_par_iter().all(|i| {
        match (index_of(i - 1), index_of(i)) {
            (Some(prev), Some(next)) => prev <= next,
            _ => false,
        }
    });

    let empty_bins = histogram
        .iter()
        .enumerate()
        .filter_map(|(bin, &count)| (count == 0).then_some(bin))
        .collect();

    Ok(SanityReport {
        resolution,
        bin_count,
        samples,
        histogram,
        out_of_range,
        monotonic,
        empty_bins,
    })
}
