//! Histogram acquisition configuration.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of position bins (about 1 mm on the reference tube).
pub const DEFAULT_BIN_COUNT: usize = 350;

/// Default exposure time in seconds.
pub const DEFAULT_EXPOSURE_TIME: f64 = 10.0;

/// Parameters for one acquisition run.
///
/// Read-only to the accumulator once a run starts.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HistogramConfig {
    /// Exposure window in seconds.
    pub exposure_time: f64,
    /// Number of equally spaced position bins.
    pub bin_count: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            exposure_time: DEFAULT_EXPOSURE_TIME,
            bin_count: DEFAULT_BIN_COUNT,
        }
    }
}

impl HistogramConfig {
    /// Creates a configuration with the given exposure and bin count.
    #[must_use]
    pub fn new(exposure_time: f64, bin_count: usize) -> Self {
        Self {
            exposure_time,
            bin_count,
        }
    }

    /// Sets the exposure time in seconds.
    #[must_use]
    pub fn with_exposure_time(mut self, seconds: f64) -> Self {
        self.exposure_time = seconds;
        self
    }

    /// Sets the number of position bins.
    #[must_use]
    pub fn with_bin_count(mut self, bins: usize) -> Self {
        self.bin_count = bins;
        self
    }

    /// Checks the invariants `exposure_time > 0` and `bin_count >= 1`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if !self.exposure_time.is_finite() || self.exposure_time <= 0.0 {
            return Err(Error::Configuration(format!(
                "exposure_time must be a positive number of seconds, got {}",
                self.exposure_time
            )));
        }
        if self.bin_count == 0 {
            return Err(Error::Configuration(
                "bin_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks the invariants plus `bin_count <= resolution`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the config is invalid or asks for
    /// more bins than the detector has position codes.
    pub fn validate_for(&self, resolution: u32) -> Result<()> {
        self.validate()?;
        if resolution == 0 {
            return Err(Error::Configuration(
                "detector resolution must be at least 1".to_string(),
            ));
        }
        if self.bin_count > resolution as usize {
            return Err(Error::Configuration(format!(
                "bin_count {} exceeds detector resolution {}",
                self.bin_count, resolution
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HistogramConfig::default();
        assert_eq!(config.bin_count, 350);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = HistogramConfig::default()
            .with_exposure_time(30.0)
            .with_bin_count(1024);
        assert!((config.exposure_time - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.bin_count, 1024);
    }

    #[test]
    fn test_rejects_non_positive_exposure() {
        for exposure in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = HistogramConfig::new(exposure, 10).validate().unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{exposure}");
        }
    }

    #[test]
    fn test_rejects_zero_bins() {
        let err = HistogramConfig::new(1.0, 0).validate().unwrap_err();
        assert!(err.to_string().contains("bin_count"));
    }

    #[test]
    fn test_bins_bounded_by_resolution() {
        let config = HistogramConfig::new(1.0, 100);
        assert!(config.validate_for(100).is_ok());
        assert!(config.validate_for(99).is_err());
        assert!(config.validate_for(0).is_err());
    }
}
