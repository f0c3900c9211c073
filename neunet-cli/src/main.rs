//! neunet: position histograms from NEUNET linear ³He detectors.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use neunet_core::config::DEFAULT_EXPOSURE_TIME;
use neunet_core::{
    acquire_array, describe, sanity_check, AcquisitionError, ArrayResult, CancelToken,
    DetectorGeometry, EventSource, HistogramConfig, ResultView, UniformSource, DEFAULT_BIN_COUNT,
};
use neunet_io::{
    read_histogram_text, rebinned_path, save_array_as, save_graph, write_graph,
    write_position_histogram, CaptureFile, NeunetClient, SaveOptions, StreamConfig,
};
use neunet_proto::{DetectorConfig, ResolutionMode};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    NeunetIo(#[from] neunet_io::Error),

    #[error("protocol error: {0}")]
    Proto(#[from] neunet_proto::Error),

    #[error("{0}")]
    Core(#[from] neunet_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("sanity check failed for R={resolution}, N={bins}")]
    SanityFailed { resolution: u32, bins: usize },
}

/// Position histograms from NEUNET linear ³He detectors.
#[derive(Parser)]
#[command(name = "neunet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    detector: DetectorArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Detector selection; flags override the configuration file.
#[derive(Args, Debug, Clone)]
struct DetectorArgs {
    /// Detector configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Board IP address
    #[arg(long, global = true)]
    address: Option<IpAddr>,

    /// PSD tubes to histogram, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    psd: Option<Vec<u8>>,

    /// Pulse-height resolution (12 or 14 bits)
    #[arg(long, global = true)]
    resolution_bits: Option<ResolutionMode>,

    /// Socket timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<f64>,
}

/// Options shared by every acquisition.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Exposure time in seconds
    #[arg(short, long, default_value_t = DEFAULT_EXPOSURE_TIME)]
    exposure: f64,

    /// Number of position bins
    #[arg(short, long, default_value_t = DEFAULT_BIN_COUNT)]
    bins: usize,

    /// Output view: structured or tuple
    #[arg(long, default_value = "structured")]
    format: ResultView,

    /// Cancel the run after this many wall-clock seconds
    #[arg(long)]
    wall_limit: Option<f64>,

    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Args, Debug, Clone)]
struct SaveArgs {
    /// Save one text histogram per PSD
    #[arg(long)]
    save: bool,

    /// Output folder for saved histograms
    #[arg(long, default_value = ".")]
    fldr: PathBuf,

    /// File name prefix for saved histograms
    #[arg(long, default_value = "test")]
    test_label: String,

    /// Replace existing files instead of appending `_1` to the label
    #[arg(long)]
    overwrite: bool,

    /// Draw counts against position into `<label>_graph.svg`
    #[arg(long)]
    graph: bool,

    /// Also write an HDF5 file
    #[cfg(feature = "hdf5")]
    #[arg(long)]
    hdf5: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage the detector and acquire PSD histograms
    Acquire {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Acquire from a captured event stream
    Replay {
        /// Capture file
        capture: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Acquire from a uniform synthetic source
    Simulate {
        /// Total events across all PSDs
        #[arg(long, default_value_t = 10_000)]
        events: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Check the bin mapping without hardware
    SanityCheck {
        /// Number of position bins
        #[arg(short, long, default_value_t = DEFAULT_BIN_COUNT)]
        bins: usize,
    },

    /// Print the output schema of an acquisition
    Describe {
        /// Number of position bins
        #[arg(short, long, default_value_t = DEFAULT_BIN_COUNT)]
        bins: usize,
    },

    /// Print decoded packets from the live event stream
    Inspect {
        /// Number of packets
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Dump the board's register block
    Registers,

    /// Re-bin a saved histogram
    Rebin {
        /// Histogram text file
        input: PathBuf,

        /// New number of bins
        #[arg(short, long)]
        bins: usize,

        /// Write the result next to the input
        #[arg(long)]
        save: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn run(cli: Cli) -> Result<()> {
    let config = detector_config(&cli.detector)?;

    match cli.command {
        Commands::Acquire { run } => {
            let mut client = NeunetClient::connect(config.clone())?;
            client.stage()?;
            let outcome = client
                .open_stream()
                .map_err(CliError::from)
                .and_then(|mut source| acquire_and_report(&mut source, &config, &run));
            if let Err(err) = client.unstage() {
                warn!("failed to unstage detector: {err}");
            }
            outcome
        }

        Commands::Replay { capture, run } => {
            let capture = CaptureFile::open(&capture)?;
            info!(
                "replaying {} ({} packets)",
                capture.path().display(),
                capture.packet_count()
            );
            let mut source = capture
                .stream(StreamConfig::new().with_resolution_mode(config.resolution_mode));
            acquire_and_report(&mut source, &config, &run)?;
            let stats = source.statistics();
            info!(
                "{} packets, {} neutrons ({} before start, {} zero pulse height)",
                stats.packets, stats.neutrons, stats.before_start, stats.zero_pulse
            );
            debug!("stream statistics: {}", serde_json::to_string(stats)?);
            Ok(())
        }

        Commands::Simulate { events, run } => {
            let mut source = UniformSource::new(config.resolution(), events, run.exposure)
                .with_channels(&config.psd_numbers);
            acquire_and_report(&mut source, &config, &run)
        }

        Commands::SanityCheck { bins } => {
            let resolution = config.resolution();
            let report = sanity_check(resolution, bins)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let (min, max) = report.count_range();
            info!("{bins} bins over {resolution} codes, {min}-{max} codes per bin");
            if report.passed() {
                Ok(())
            } else {
                Err(CliError::SanityFailed { resolution, bins })
            }
        }

        Commands::Describe { bins } => {
            let fields = describe(&config.psd_numbers, bins);
            println!("{}", serde_json::to_string_pretty(&fields)?);
            Ok(())
        }

        Commands::Inspect { count } => {
            let client = NeunetClient::connect(config)?;
            for packet in client.inspect(count)? {
                println!("{packet}");
            }
            Ok(())
        }

        Commands::Registers => {
            let mut client = NeunetClient::connect(config)?;
            print!("{}", client.read_full_register()?);
            let time = client.device_time()?;
            println!("device time: {time}");
            Ok(())
        }

        Commands::Rebin { input, bins, save } => {
            let histogram = read_histogram_text(&input)?;
            let rebinned = histogram.rebin(bins)?;
            for (position, count) in rebinned.positions.iter().zip(&rebinned.counts) {
                println!("{position:.6} {count}");
            }
            if save {
                let out = rebinned_path(&input, bins);
                let header = vec![format!("rebinned from {} into {bins} bins", input.display())];
                write_position_histogram(&out, &rebinned, &header)?;
                info!("saved {}", out.display());
            }
            Ok(())
        }
    }
}

fn detector_config(args: &DetectorArgs) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(address) = args.address {
        config = config.with_address(address);
    }
    if let Some(psd) = &args.psd {
        config = config.with_psd_numbers(psd.clone());
    }
    if let Some(mode) = args.resolution_bits {
        config = config.with_resolution_mode(mode);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout_secs(timeout);
    }
    config.validate()?;
    Ok(config)
}

fn acquire_and_report<S: EventSource>(
    source: &mut S,
    config: &DetectorConfig,
    run: &RunArgs,
) -> Result<()> {
    let cancel = CancelToken::new();
    if let Some(limit) = run.wall_limit {
        arm_watchdog(limit, cancel.clone())?;
    }

    let histogram = HistogramConfig::new(run.exposure, run.bins);
    match acquire_array(source, histogram, &config.psd_numbers, &cancel) {
        Ok(result) => report(&result, config, run),
        Err(AcquisitionError::Configuration(err) | AcquisitionError::InvalidState(err)) => {
            Err(err.into())
        }
        Err(AcquisitionError::SourceUnavailable {
            reason, partial, ..
        }) => {
            report(&partial, config, run)?;
            Err(CliError::Acquisition(reason))
        }
    }
}

fn arm_watchdog(limit: f64, cancel: CancelToken) -> Result<()> {
    let limit = Duration::try_from_secs_f64(limit).map_err(|e| {
        neunet_core::Error::Configuration(format!("invalid wall limit {limit}: {e}"))
    })?;
    thread::spawn(move || {
        thread::sleep(limit);
        if !cancel.is_cancelled() {
            warn!("wall-clock limit of {:?} reached, cancelling", limit);
            cancel.cancel();
        }
    });
    Ok(())
}

fn report(result: &ArrayResult, config: &DetectorConfig, run: &RunArgs) -> Result<()> {
    let geometry = config.geometry();
    for (psd, detector) in &result.detectors {
        info!(
            "detector {psd}: {} counts, {} out of range, {:.1}% in range",
            detector.total_counts(),
            detector.statistics.out_of_range,
            detector.statistics.in_range_fraction() * 100.0
        );
    }
    if result.unrouted > 0 {
        info!("{} events on other PSDs", result.unrouted);
    }

    if run.save.save {
        save_results(result, &geometry, &run.save)?;
    } else if run.save.graph {
        let label = &run.save.test_label;
        let path = run.save.fldr.join(format!("{label}_graph.svg"));
        write_graph(&path, result, &geometry, label)?;
        info!("saved {}", path.display());
    }

    let json = match run.format {
        ResultView::Structured => serde_json::to_string_pretty(result)?,
        ResultView::Tuple => {
            let tuples: BTreeMap<String, _> = result
                .detectors
                .iter()
                .map(|(psd, detector)| (format!("detector {psd}"), detector.as_tuple()))
                .collect();
            serde_json::to_string_pretty(&tuples)?
        }
    };
    println!("{json}");
    Ok(())
}

fn save_results(result: &ArrayResult, geometry: &DetectorGeometry, args: &SaveArgs) -> Result<()> {
    let options = SaveOptions::new()
        .with_fldr(&args.fldr)
        .with_test_label(args.test_label.as_str())
        .with_overwrite(args.overwrite);
    let Some(&first) = result.detectors.keys().next() else {
        warn!("no detectors to save");
        return Ok(());
    };
    let label = options.resolve_label(first);
    let paths = save_array_as(&options, &label, result, geometry)?;
    info!("saved {} histogram files", paths.len());

    if args.graph {
        save_graph(&options, &label, result, geometry)?;
    }

    #[cfg(feature = "hdf5")]
    if let Some(path) = &args.hdf5 {
        neunet_io::write_histograms_hdf5(
            path,
            result,
            geometry,
            &neunet_io::Hdf5WriteOptions::default(),
        )?;
        info!("saved {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_acquire() {
        let cli = Cli::try_parse_from([
            "neunet",
            "--psd",
            "0,7",
            "acquire",
            "--exposure",
            "30",
            "--bins",
            "100",
            "--format",
            "tuple",
            "--save",
            "--test-label",
            "run",
            "--graph",
        ])
        .unwrap();
        assert_eq!(cli.detector.psd, Some(vec![0, 7]));
        match cli.command {
            Commands::Acquire { run } => {
                assert!((run.exposure - 30.0).abs() < f64::EPSILON);
                assert_eq!(run.bins, 100);
                assert_eq!(run.format, ResultView::Tuple);
                assert!(run.save.save);
                assert_eq!(run.save.test_label, "run");
                assert!(!run.save.overwrite);
                assert!(run.save.graph);
            }
            _ => panic!("expected acquire"),
        }
    }

    #[test]
    fn test_detector_overrides() {
        let args = DetectorArgs {
            config: None,
            address: Some("127.0.0.1".parse().unwrap()),
            psd: Some(vec![3]),
            resolution_bits: Some(ResolutionMode::Bits12),
            timeout: Some(1.0),
        };
        let config = detector_config(&args).unwrap();
        assert_eq!(config.psd_numbers, vec![3]);
        assert_eq!(config.resolution(), 4096);

        let bad = DetectorArgs {
            psd: Some(vec![9]),
            ..args
        };
        assert!(detector_config(&bad).is_err());
    }

    #[test]
    fn test_watchdog_rejects_negative_limit() {
        assert!(arm_watchdog(-1.0, CancelToken::new()).is_err());
    }

    #[test]
    fn test_simulated_run_with_save() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectorConfig::default();
        let run = RunArgs {
            exposure: 5.0,
            bins: 50,
            format: ResultView::Structured,
            wall_limit: None,
            save: SaveArgs {
                save: true,
                fldr: dir.path().to_path_buf(),
                test_label: "sim".to_string(),
                overwrite: false,
                graph: true,
                #[cfg(feature = "hdf5")]
                hdf5: None,
            },
        };
        let mut source =
            UniformSource::new(config.resolution(), 1000, 5.0).with_channels(&config.psd_numbers);
        acquire_and_report(&mut source, &config, &run).unwrap();
        assert!(dir.path().join("sim_detector0_histogram.txt").exists());
        assert!(dir.path().join("sim_detector7_histogram.txt").exists());
        assert!(dir.path().join("sim_graph.svg").exists());

        // Second run keeps the first files and saves everything under `sim_1`.
        let mut source =
            UniformSource::new(config.resolution(), 1000, 5.0).with_channels(&config.psd_numbers);
        acquire_and_report(&mut source, &config, &run).unwrap();
        assert!(dir.path().join("sim_1_detector0_histogram.txt").exists());
        assert!(dir.path().join("sim_1_graph.svg").exists());
    }
}
