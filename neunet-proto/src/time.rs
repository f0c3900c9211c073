//! Instrument time, the NEUNET board clock.
//!
//! On the wire it is five bytes: four big-endian whole seconds since
//! 2008-01-01 00:00 UTC followed by one byte of 1/256 s fractions. The same
//! five bytes appear in `0x6C` stream packets and in the device time register.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp of the instrument epoch, 2008-01-01 00:00:00 UTC.
pub const EPOCH_UNIX_SECONDS: i64 = 1_199_145_600;

/// Encoded length in bytes.
pub const INSTRUMENT_TIME_LEN: usize = 5;

const NANOS_PER_SUBSECOND: u32 = 1_000_000_000 / 256;

/// A point on the board clock with 1/256 s resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InstrumentTime {
    seconds: u32,
    subseconds: u8,
}

impl InstrumentTime {
    /// Creates a time from whole seconds and 1/256 s fractions.
    #[must_use]
    pub const fn new(seconds: u32, subseconds: u8) -> Self {
        Self {
            seconds,
            subseconds,
        }
    }

    /// Whole seconds since the epoch.
    #[must_use]
    pub fn seconds(self) -> u32 {
        self.seconds
    }

    /// Fractional part in 1/256 s.
    #[must_use]
    pub fn subseconds(self) -> u8 {
        self.subseconds
    }

    /// Decodes the first five bytes of `bytes`.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than five bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INSTRUMENT_TIME_LEN {
            return Err(Error::Truncated {
                expected: INSTRUMENT_TIME_LEN,
                found: bytes.len(),
            });
        }
        let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Self::new(seconds, bytes[4]))
    }

    /// Encodes to the five-byte wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; INSTRUMENT_TIME_LEN] {
        let s = self.seconds.to_be_bytes();
        [s[0], s[1], s[2], s[3], self.subseconds]
    }

    /// Seconds since the epoch as a float.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.seconds) + f64::from(self.subseconds) / 256.0
    }

    /// Builds a time from float seconds since the epoch, truncating to the
    /// clock resolution.
    ///
    /// # Errors
    /// Returns [`Error::TimeOutOfRange`] for negative, non-finite or too
    /// large values.
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs < 0.0 || secs >= 4_294_967_296.0 {
            return Err(Error::TimeOutOfRange(format!("{secs} s since 2008")));
        }
        let whole = secs.floor();
        let subseconds = ((secs - whole) * 256.0).floor().min(255.0);
        Ok(Self::new(whole as u32, subseconds as u8))
    }

    /// Converts a UTC wall-clock time.
    ///
    /// # Errors
    /// Returns [`Error::TimeOutOfRange`] for times before 2008 or past the
    /// 32-bit seconds counter.
    pub fn from_datetime(datetime: DateTime<Utc>) -> Result<Self> {
        let delta = datetime.timestamp() - EPOCH_UNIX_SECONDS;
        let seconds = u32::try_from(delta)
            .map_err(|_| Error::TimeOutOfRange(format!("{datetime} is outside 2008..2144")))?;
        let subseconds = (datetime.timestamp_subsec_nanos() / NANOS_PER_SUBSECOND).min(255);
        Ok(Self::new(seconds, subseconds as u8))
    }

    /// The current wall-clock time, as written to the board when staging.
    ///
    /// # Errors
    /// Returns [`Error::TimeOutOfRange`] if the system clock is before 2008.
    pub fn now() -> Result<Self> {
        Self::from_datetime(Utc::now())
    }

    /// Converts to UTC wall-clock time.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(
            EPOCH_UNIX_SECONDS + i64::from(self.seconds),
            u32::from(self.subseconds) * NANOS_PER_SUBSECOND,
        )
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is later).
    #[must_use]
    pub fn seconds_since(self, earlier: Self) -> f64 {
        self.as_secs_f64() - earlier.as_secs_f64()
    }
}

impl fmt::Display for InstrumentTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
            None => write!(f, "{} s since 2008", self.as_secs_f64()),
        }
    }
}
