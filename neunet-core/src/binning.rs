//! Position binning for linear PSD tubes.
//!
//! A tube reports positions as integer codes in `[0, R)`, where R is the
//! native resolution. [`BinMapper`] splits that range into N bins of equal
//! width `R / N` and maps each code to `floor(p / (R / N))`.
//!
//! The mapping is evaluated as `p * N / R` in 64-bit integers, which is the
//! exact floor of the real-valued quotient. When R is not a multiple of N the
//! bins differ in width by at most one code; no float rounding can move a code
//! across an edge.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::{Error, Result};
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default sensitive length of the reference tube in millimetres.
pub const DEFAULT_SENSITIVE_LENGTH_MM: f64 = 350.0;

/// Maps raw position codes to histogram bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinMapper {
    resolution: u32,
    bin_count: usize,
}

impl BinMapper {
    /// Creates a mapper for `bin_count` bins over `resolution` codes.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if either value is zero or if there
    /// are more bins than codes.
    pub fn new(resolution: u32, bin_count: usize) -> Result<Self> {
        if resolution == 0 {
            return Err(Error::Configuration(
                "detector resolution must be at least 1".to_string(),
            ));
        }
        if bin_count == 0 {
            return Err(Error::Configuration(
                "bin_count must be at least 1".to_string(),
            ));
        }
        if bin_count > resolution as usize {
            return Err(Error::Configuration(format!(
                "bin_count {bin_count} exceeds detector resolution {resolution}"
            )));
        }
        Ok(Self {
            resolution,
            bin_count,
        })
    }

    /// Native resolution R.
    #[inline]
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of bins N.
    #[inline]
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Bin width `R / N` in raw position units.
    #[inline]
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        f64::from(self.resolution) / self.bin_count as f64
    }

    /// Maps a raw position code to its bin, or `None` if it falls outside
    /// `[0, N)`.
    #[inline]
    #[must_use]
    pub fn map(&self, raw_position: u32) -> Option<usize> {
        let index = u64::from(raw_position) * self.bin_count as u64 / u64::from(self.resolution);
        let index = index as usize;
        (index < self.bin_count).then_some(index)
    }

    /// Raw codes that land in `bin`, or `None` if `bin >= bin_count`.
    #[must_use]
    pub fn codes_in_bin(&self, bin: usize) -> Option<Range<u32>> {
        (bin < self.bin_count).then(|| self.first_code(bin)..self.first_code(bin + 1))
    }

    /// Smallest code p with `p * N / R >= bin`, i.e. `ceil(bin * R / N)`.
    fn first_code(&self, bin: usize) -> u32 {
        let n = self.bin_count as u64;
        let scaled = bin as u64 * u64::from(self.resolution);
        scaled.div_ceil(n) as u32
    }

    /// The N + 1 bin edges in raw position units, from 0 to R.
    #[must_use]
    pub fn edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..=self.bin_count).map(|i| i as f64 * width).collect()
    }

    /// Bin centres in raw position units.
    #[must_use]
    pub fn centers(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..self.bin_count)
            .map(|i| (i as f64 + 0.5) * width)
            .collect()
    }
}

/// Physical extent of a tube.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorGeometry {
    /// Sensitive length along the tube axis in millimetres.
    pub sensitive_length_mm: f64,
}

impl Default for DetectorGeometry {
    fn default() -> Self {
        Self {
            sensitive_length_mm: DEFAULT_SENSITIVE_LENGTH_MM,
        }
    }
}

impl DetectorGeometry {
    /// Creates a geometry with the given sensitive length.
    #[must_use]
    pub fn new(sensitive_length_mm: f64) -> Self {
        Self {
            sensitive_length_mm,
        }
    }

    /// Spatial resolution in millimetres for a given number of bins.
    #[must_use]
    pub fn bin_size_mm(&self, bin_count: usize) -> f64 {
        self.sensitive_length_mm / bin_count as f64
    }

    /// Bin centres in millimetres from the start of the tube.
    #[must_use]
    pub fn bin_centers_mm(&self, mapper: &BinMapper) -> Vec<f64> {
        let scale = self.sensitive_length_mm / f64::from(mapper.resolution());
        mapper.centers().into_iter().map(|c| c * scale).collect()
    }

    /// Position of a raw code in millimetres.
    #[must_use]
    pub fn position_mm(&self, raw_position: u32, resolution: u32) -> f64 {
        f64::from(raw_position) * self.sensitive_length_mm / f64::from(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_boundaries() {
        let mapper = BinMapper::new(35_000, 350).unwrap();
        assert_eq!(mapper.map(0), Some(0));
        assert_eq!(mapper.map(34_999), Some(349));
        assert_eq!(mapper.map(35_000), None);
        assert_eq!(mapper.map(u32::MAX), None);
        assert_relative_eq!(mapper.bin_width(), 100.0);
    }

    #[test]
    fn test_uneven_division_covers_all_bins() {
        let mapper = BinMapper::new(1000, 7).unwrap();
        let mut seen = vec![0u32; 7];
        let mut previous = 0;
        for p in 0..1000 {
            let bin = mapper.map(p).unwrap();
            assert!(bin >= previous, "mapping must be monotonic");
            previous = bin;
            seen[bin] += 1;
        }
        assert!(seen.iter().all(|&c| c == 142 || c == 143), "{seen:?}");
        assert_eq!(seen.iter().sum::<u32>(), 1000);
    }

    #[test]
    fn test_codes_in_bin_agree_with_map() {
        let mapper = BinMapper::new(1000, 7).unwrap();
        let mut next = 0;
        for bin in 0..7 {
            let codes = mapper.codes_in_bin(bin).unwrap();
            assert_eq!(codes.start, next);
            for p in codes.clone() {
                assert_eq!(mapper.map(p), Some(bin));
            }
            next = codes.end;
        }
        assert_eq!(next, 1000);
        assert_eq!(mapper.codes_in_bin(7), None);
    }

    #[test]
    fn test_single_bin() {
        let mapper = BinMapper::new(16_384, 1).unwrap();
        assert_eq!(mapper.map(0), Some(0));
        assert_eq!(mapper.map(16_383), Some(0));
        assert_eq!(mapper.edges(), vec![0.0, 16_384.0]);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(BinMapper::new(0, 1).is_err());
        assert!(BinMapper::new(10, 0).is_err());
        assert!(BinMapper::new(10, 11).is_err());
        assert!(BinMapper::new(10, 10).is_ok());
    }

    #[test]
    fn test_geometry_centers() {
        let mapper = BinMapper::new(35_000, 350).unwrap();
        let geometry = DetectorGeometry::default();
        let centers = geometry.bin_centers_mm(&mapper);
        assert_eq!(centers.len(), 350);
        assert_relative_eq!(centers[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(centers[349], 349.5, epsilon = 1e-9);
        assert_relative_eq!(geometry.bin_size_mm(350), 1.0);
        assert_relative_eq!(geometry.position_mm(17_500, 35_000), 175.0);
    }
}
