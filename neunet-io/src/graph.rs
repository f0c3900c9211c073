//! Counts-versus-position charts.
//!
//! One SVG line chart per run, one line per PSD over the sensitive length of
//! the tube.
#![allow(clippy::cast_precision_loss)]

use crate::{Error, Result, SaveOptions};
use log::info;
use neunet_core::{ArrayResult, BinMapper, DetectorGeometry};
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

/// Chart size in pixels.
pub const GRAPH_SIZE: (u32, u32) = (1024, 768);

/// Default chart title.
pub const GRAPH_TITLE: &str = "Neutron counts v. position";

/// Draws every detector of `result` into one SVG chart at `path`.
///
/// # Errors
/// Returns an error if a histogram does not fit its resolution or the chart
/// cannot be rendered or written.
pub fn write_graph<P: AsRef<Path>>(
    path: P,
    result: &ArrayResult,
    geometry: &DetectorGeometry,
    title: &str,
) -> Result<()> {
    // Every x axis is resolved before the backend creates the file.
    let mut lines = Vec::with_capacity(result.detectors.len());
    for (&psd, detector) in &result.detectors {
        let mapper = BinMapper::new(detector.resolution, detector.bin_count())?;
        let points: Vec<(f64, f64)> = geometry
            .bin_centers_mm(&mapper)
            .into_iter()
            .zip(detector.histogram.iter().map(|&count| count as f64))
            .collect();
        lines.push((psd, points));
    }

    let root = SVGBackend::new(path.as_ref(), GRAPH_SIZE).into_drawing_area();
    draw_lines(&root, lines, geometry.sensitive_length_mm, title)
}

/// Writes `{label}_graph.svg` next to the text histograms saved under
/// `label`.
///
/// # Errors
/// Returns an error if the chart cannot be written.
pub fn save_graph(
    options: &SaveOptions,
    label: &str,
    result: &ArrayResult,
    geometry: &DetectorGeometry,
) -> Result<PathBuf> {
    let path = options.graph_path(label);
    write_graph(&path, result, geometry, label)?;
    info!("saved {}", path.display());
    Ok(path)
}

fn draw_lines<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    lines: Vec<(u8, Vec<(f64, f64)>)>,
    length_mm: f64,
    title: &str,
) -> Result<()> {
    let peak = lines
        .iter()
        .flat_map(|(_, points)| points.iter().map(|&(_, count)| count))
        .fold(0.0_f64, f64::max);
    let y_max = (peak * 1.05).max(1.0);

    root.fill(&WHITE).map_err(graph_error)?;

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .caption(title, ("sans-serif", 30.0).into_font())
        .build_cartesian_2d(0.0..length_mm, 0.0..y_max)
        .map_err(graph_error)?;

    chart
        .configure_mesh()
        .x_desc("position (mm)")
        .y_desc("neutron count")
        .draw()
        .map_err(graph_error)?;

    for (index, (psd, points)) in lines.into_iter().enumerate() {
        let color = Palette99::pick(index).to_rgba();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))
            .map_err(graph_error)?
            .label(format!("detector {psd}"))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(graph_error)?;

    root.present().map_err(graph_error)?;
    Ok(())
}

fn graph_error<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> Error {
    Error::Graph(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use neunet_core::{AccumulatorStatistics, AcquisitionResult, CompletionReason, RunStatus};
    use std::collections::BTreeMap;

    fn result() -> ArrayResult {
        let detector = |histogram: Vec<u64>| AcquisitionResult {
            start_time: Utc::now(),
            elapsed_time: 10.0,
            resolution: 16_384,
            status: RunStatus::Completed(CompletionReason::WindowElapsed),
            statistics: AccumulatorStatistics::default(),
            histogram,
        };
        let mut detectors = BTreeMap::new();
        detectors.insert(0, detector(vec![1, 4, 9, 4, 1]));
        detectors.insert(7, detector(vec![0, 2, 3, 2, 0]));
        ArrayResult {
            start_time: Utc::now(),
            elapsed_time: 10.0,
            status: RunStatus::Completed(CompletionReason::WindowElapsed),
            detectors,
            unrouted: 0,
        }
    }

    #[test]
    fn test_graph_saved_under_label() {
        let dir = tempfile::tempdir().unwrap();
        let options = SaveOptions::new().with_fldr(dir.path());
        let path = save_graph(&options, "scan", &result(), &DetectorGeometry::default()).unwrap();

        assert_eq!(path, dir.path().join("scan_graph.svg"));
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("detector 0"));
        assert!(svg.contains("detector 7"));
        assert!(svg.contains("position (mm)"));
    }

    #[test]
    fn test_graph_rejects_mismatched_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = result();
        bad.detectors.get_mut(&0).unwrap().resolution = 2;
        let path = dir.path().join("bad.svg");

        assert!(write_graph(&path, &bad, &DetectorGeometry::default(), GRAPH_TITLE).is_err());
        assert!(!path.exists());
    }
}
