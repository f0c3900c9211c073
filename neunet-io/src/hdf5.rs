//! HDF5/NeXus histogram files.
//!
//! Layout: `/entry` (`NXentry`) carries the run timing; each PSD gets an
//! `NXdata` group `/entry/detector_{psd}` with a `counts` signal and a
//! `position` axis in millimetres.

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::ArrayView1;
use neunet_core::{ArrayResult, BinMapper, DetectorGeometry};
use std::path::Path;
use std::str::FromStr;

/// Value of the `neunet_format_version` file attribute.
pub const FORMAT_VERSION: &str = "0.1";

const DETECTOR_PREFIX: &str = "detector_";

/// Dataset creation options.
#[derive(Clone, Debug)]
pub struct Hdf5WriteOptions {
    /// Chunk length of the `counts` dataset.
    pub chunk_bins: Option<usize>,
    /// Deflate level, if any.
    pub compression: Option<u8>,
    /// Whether to apply the shuffle filter.
    pub shuffle: bool,
}

impl Default for Hdf5WriteOptions {
    fn default() -> Self {
        Self {
            chunk_bins: None,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// One PSD's histogram read back from a file.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorHistogram {
    /// PSD tube number.
    pub psd: u8,
    /// Counts per bin.
    pub counts: Vec<u64>,
    /// Bin centres in millimetres, same length as `counts`.
    pub position_mm: Vec<f64>,
    /// Native resolution R of the run; 0 if the attribute is missing.
    pub resolution: u32,
    /// Events taken from the source for this tube.
    pub events_consumed: u64,
    /// Events whose position fell outside `[0, R)`.
    pub out_of_range: u64,
}

/// Contents of a histogram file.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramFile {
    /// Wall-clock start of the run, RFC 3339.
    pub start_time: Option<String>,
    /// Exposure actually covered, in seconds.
    pub elapsed_time: f64,
    /// Run status as displayed, e.g. `completed (window elapsed)`.
    pub status: Option<String>,
    /// Events on PSDs that were not histogrammed.
    pub unrouted: u64,
    /// Tube length used for the position axis.
    pub sensitive_length_mm: Option<f64>,
    /// Detectors in PSD order.
    pub detectors: Vec<DetectorHistogram>,
}

/// Writes every detector of `result` to a new HDF5 file.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_histograms_hdf5<P: AsRef<Path>>(
    path: P,
    result: &ArrayResult,
    geometry: &DetectorGeometry,
    options: &Hdf5WriteOptions,
) -> Result<()> {
    let file = File::create(path)?;
    set_attr_str_file(&file, "neunet_format_version", FORMAT_VERSION)?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    set_attr_str_group(&entry, "start_time", &result.start_time.to_rfc3339())?;
    set_attr_str_group(&entry, "status", &result.status.to_string())?;
    set_attr_scalar(&entry, "elapsed_time", &result.elapsed_time)?;
    set_attr_scalar(&entry, "unrouted", &result.unrouted)?;
    set_attr_scalar(&entry, "sensitive_length_mm", &geometry.sensitive_length_mm)?;

    for (&psd, detector) in &result.detectors {
        let group = entry.create_group(&format!("{DETECTOR_PREFIX}{psd}"))?;
        set_attr_str_group(&group, "NX_class", "NXdata")?;
        set_attr_str_group(&group, "signal", "counts")?;
        set_axes_attr(&group, &["position"])?;
        set_axis_indices(&group, "position", 0)?;
        set_attr_scalar(&group, "psd", &psd)?;
        set_attr_scalar(&group, "resolution", &detector.resolution)?;
        set_attr_scalar(&group, "events_consumed", &detector.statistics.events_consumed)?;
        set_attr_scalar(&group, "out_of_range", &detector.statistics.out_of_range)?;

        let bins = detector.bin_count();
        let counts_ds = create_fixed_dataset::<u64, _>(
            &group,
            "counts",
            (bins,),
            options.chunk_bins.map(|c| c.clamp(1, bins.max(1))),
            options.compression,
            options.shuffle,
        )?;
        set_dataset_units(&counts_ds, "count")?;
        counts_ds.write(ArrayView1::from(detector.histogram.as_slice()))?;

        let mapper = BinMapper::new(detector.resolution, bins)?;
        let position = geometry.bin_centers_mm(&mapper);
        let position_ds = create_fixed_dataset::<f64, _>(
            &group,
            "position",
            (position.len(),),
            None,
            None,
            false,
        )?;
        set_dataset_units(&position_ds, "mm")?;
        position_ds.write(ArrayView1::from(position.as_slice()))?;
    }
    Ok(())
}

/// Reads a file written by [`write_histograms_hdf5`].
///
/// # Errors
/// Returns an error if HDF5 I/O fails or required datasets are missing.
pub fn read_histograms_hdf5<P: AsRef<Path>>(path: P) -> Result<HistogramFile> {
    let file = File::open(path)?;
    let entry = file.group("entry")?;

    let mut detectors = Vec::new();
    for name in entry.member_names()? {
        if !name.starts_with(DETECTOR_PREFIX) {
            continue;
        }
        let group = entry.group(&name)?;
        let psd = read_attr_opt::<u8>(&group, "psd")?
            .ok_or_else(|| Error::InvalidFormat(format!("{name} has no psd attribute")))?;
        let counts = read_dataset_vec::<u64>(&group, "counts")?;
        let position_mm = read_dataset_vec::<f64>(&group, "position")?;
        if counts.len() != position_mm.len() {
            return Err(Error::InvalidFormat(format!(
                "{name}: {} counts but {} positions",
                counts.len(),
                position_mm.len()
            )));
        }
        detectors.push(DetectorHistogram {
            psd,
            counts,
            position_mm,
            resolution: read_attr_opt::<u32>(&group, "resolution")?.unwrap_or_default(),
            events_consumed: read_attr_opt::<u64>(&group, "events_consumed")?.unwrap_or_default(),
            out_of_range: read_attr_opt::<u64>(&group, "out_of_range")?.unwrap_or_default(),
        });
    }
    detectors.sort_by_key(|d| d.psd);

    Ok(HistogramFile {
        start_time: read_attr_opt_string(&entry, "start_time")?,
        elapsed_time: read_attr_opt::<f64>(&entry, "elapsed_time")?.unwrap_or_default(),
        status: read_attr_opt_string(&entry, "status")?,
        unrouted: read_attr_opt::<u64>(&entry, "unrouted")?.unwrap_or_default(),
        sensitive_length_mm: read_attr_opt::<f64>(&entry, "sensitive_length_mm")?,
        detectors,
    })
}

fn create_fixed_dataset<T: H5Type, S>(
    group: &Group,
    name: &str,
    shape: S,
    chunk: Option<usize>,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset>
where
    S: Into<hdf5::Extents>,
{
    let mut builder = group.new_dataset::<T>().shape(shape);

    if let Some(length) = chunk {
        builder = builder.chunk((length,));
    }

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn set_axes_attr(group: &Group, axes: &[&str]) -> Result<()> {
    let values: Vec<VarLenUnicode> = axes
        .iter()
        .map(|axis| to_var_len_unicode(axis))
        .collect::<Result<Vec<_>>>()?;
    let attr = group
        .new_attr::<VarLenUnicode>()
        .shape((values.len(),))
        .create("axes")?;
    attr.write(ArrayView1::from(values.as_slice()))?;
    Ok(())
}

fn set_axis_indices(group: &Group, name: &str, index: i32) -> Result<()> {
    let attr_name = format!("{name}_indices");
    set_attr_scalar(group, &attr_name, &index)
}

fn set_attr_scalar<T: H5Type>(group: &Group, name: &str, value: &T) -> Result<()> {
    group.new_attr::<T>().create(name)?.write_scalar(value)?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn read_attr_opt<T: H5Type + Clone>(group: &Group, name: &str) -> Result<Option<T>> {
    match group.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn read_attr_opt_string(group: &Group, name: &str) -> Result<Option<String>> {
    match group.attr(name) {
        Ok(attr) => {
            let value: VarLenUnicode = attr.read_scalar()?;
            Ok(Some(value.to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
