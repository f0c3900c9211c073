//! Plain-text histogram files.
//!
//! One file per PSD: `#`-prefixed header lines followed by two
//! whitespace-separated columns, position in millimetres and counts.

use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use log::info;
use neunet_core::{AcquisitionResult, ArrayResult, BinMapper, DetectorGeometry, PositionHistogram};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Where and under which label histograms are saved.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SaveOptions {
    /// Output folder.
    pub fldr: PathBuf,
    /// File name prefix.
    pub test_label: String,
    /// Replace existing files instead of picking a new label.
    pub overwrite: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            fldr: PathBuf::from("."),
            test_label: "test".to_string(),
            overwrite: false,
        }
    }
}

impl SaveOptions {
    /// Creates save options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output folder.
    #[must_use]
    pub fn with_fldr<P: Into<PathBuf>>(mut self, fldr: P) -> Self {
        self.fldr = fldr.into();
        self
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn with_test_label<S: Into<String>>(mut self, label: S) -> Self {
        self.test_label = label.into();
        self
    }

    /// Sets whether existing files are replaced.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Path of the histogram file for `psd` under `label`.
    #[must_use]
    pub fn histogram_path(&self, label: &str, psd: u8) -> PathBuf {
        self.fldr.join(format!("{label}_detector{psd}_histogram.txt"))
    }

    /// Path of the counts-versus-position chart under `label`.
    #[must_use]
    pub fn graph_path(&self, label: &str) -> PathBuf {
        self.fldr.join(format!("{label}_graph.svg"))
    }

    /// Label to save under. Without `overwrite`, `_1` is appended when the
    /// file for `first_psd` already exists.
    #[must_use]
    pub fn resolve_label(&self, first_psd: u8) -> String {
        if !self.overwrite && self.histogram_path(&self.test_label, first_psd).exists() {
            format!("{}_1", self.test_label)
        } else {
            self.test_label.clone()
        }
    }
}

/// Writer for one histogram text file.
pub struct HistogramWriter {
    writer: BufWriter<File>,
}

impl HistogramWriter {
    /// Creates (or truncates) the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Writes one `# `-prefixed header line.
    ///
    /// # Errors
    /// Returns an error on write failure.
    pub fn write_header_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "# {line}")?;
        Ok(())
    }

    /// Writes the header block describing one detector's run.
    ///
    /// # Errors
    /// Returns an error on write failure.
    pub fn write_run_header(&mut self, psd: u8, result: &AcquisitionResult) -> Result<()> {
        let end = end_time(result.start_time, result.elapsed_time);
        self.write_header_line(&format!("detector {psd}"))?;
        self.write_header_line(&format!(
            "Start time: {}",
            result.start_time.format(TIME_FORMAT)
        ))?;
        self.write_header_line(&format!("End time: {}", end.format(TIME_FORMAT)))?;
        self.write_header_line(&format!("Exposure time (s): {}", result.elapsed_time))?;
        self.write_header_line(&format!("Status: {}", result.status))?;
        self.write_header_line(
            "column 1 = physical position (mm), column 2 = counts per position.",
        )
    }

    /// Writes (position, count) rows.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the columns differ in length, or
    /// an error on write failure.
    pub fn write_rows<C: std::fmt::Display>(
        &mut self,
        positions: &[f64],
        counts: &[C],
    ) -> Result<()> {
        if positions.len() != counts.len() {
            return Err(Error::InvalidFormat(format!(
                "{} positions but {} counts",
                positions.len(),
                counts.len()
            )));
        }
        for (position, count) in positions.iter().zip(counts) {
            writeln!(self.writer, "{position:.6} {count}")?;
        }
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error on write failure.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes one detector's histogram with bin centres in millimetres.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_histogram<P: AsRef<Path>>(
    path: P,
    psd: u8,
    result: &AcquisitionResult,
    geometry: &DetectorGeometry,
) -> Result<()> {
    let mapper = BinMapper::new(result.resolution, result.bin_count())?;
    let positions = geometry.bin_centers_mm(&mapper);
    let mut writer = HistogramWriter::create(path)?;
    writer.write_run_header(psd, result)?;
    writer.write_rows(&positions, &result.histogram)?;
    writer.flush()
}

/// Saves every detector of `result`, one file each. Returns the paths
/// written, in PSD order.
///
/// # Errors
/// Returns an error if a file cannot be written.
pub fn save_array(
    options: &SaveOptions,
    result: &ArrayResult,
    geometry: &DetectorGeometry,
) -> Result<Vec<PathBuf>> {
    let Some(&first) = result.detectors.keys().next() else {
        return Ok(Vec::new());
    };
    let label = options.resolve_label(first);
    save_array_as(options, &label, result, geometry)
}

/// Saves every detector of `result` under an already resolved `label`.
///
/// # Errors
/// Returns an error if a file cannot be written.
pub fn save_array_as(
    options: &SaveOptions,
    label: &str,
    result: &ArrayResult,
    geometry: &DetectorGeometry,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(result.detectors.len());
    for (&psd, detector) in &result.detectors {
        let path = options.histogram_path(label, psd);
        write_histogram(&path, psd, detector, geometry)?;
        info!("saved {}", path.display());
        paths.push(path);
    }
    Ok(paths)
}

/// Writes a (position, counts) histogram with optional header lines.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_position_histogram<P: AsRef<Path>>(
    path: P,
    histogram: &PositionHistogram,
    header: &[String],
) -> Result<()> {
    let mut writer = HistogramWriter::create(path)?;
    for line in header {
        writer.write_header_line(line)?;
    }
    writer.write_rows(&histogram.positions, &histogram.counts)?;
    writer.flush()
}

/// Reads a two-column histogram file. Lines starting with `#`, blank lines
/// and unparseable lines before the first data row are treated as header.
///
/// # Errors
/// Returns an error if the file cannot be read or a data row is malformed.
pub fn read_histogram_text<P: AsRef<Path>>(path: P) -> Result<PositionHistogram> {
    let reader = BufReader::new(File::open(&path)?);
    let mut positions = Vec::new();
    let mut counts = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_row(trimmed) {
            Some((position, count)) => {
                positions.push(position);
                counts.push(count);
            }
            None if positions.is_empty() => {}
            None => {
                return Err(Error::InvalidFormat(format!(
                    "{}:{}: expected two numeric columns, got '{trimmed}'",
                    path.as_ref().display(),
                    index + 1
                )));
            }
        }
    }

    if positions.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "{}: no histogram rows",
            path.as_ref().display()
        )));
    }
    Ok(PositionHistogram::new(positions, counts)?)
}

/// Output path for a re-binned copy of `input`: the same folder, file name
/// prefixed with `rebinned_{bins}bins`.
#[must_use]
pub fn rebinned_path(input: &Path, bins: usize) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("rebinned_{bins}bins{name}"))
}

fn parse_row(line: &str) -> Option<(f64, f64)> {
    let mut columns = line.split_whitespace();
    let position = columns.next()?.parse().ok()?;
    let count = columns.next()?.parse().ok()?;
    Some((position, count))
}

fn end_time(start: DateTime<Utc>, elapsed: f64) -> DateTime<Utc> {
    std::time::Duration::try_from_secs_f64(elapsed)
        .ok()
        .and_then(|d| TimeDelta::from_std(d).ok())
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(start)
}
