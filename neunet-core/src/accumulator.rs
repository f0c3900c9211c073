//! Histogram accumulation over a bounded exposure window.
//!
//! A run moves through `Idle → Running → {Completed, Failed}`. While running,
//! the accumulator polls its [`EventSource`] with the exposure time as
//! deadline, bins every event and follows the source clock. The run completes
//! when the window elapses, the source is exhausted or the caller cancels; it
//! fails when the source reports [`Error::SourceUnavailable`].
//!
//! An event stamped exactly at `exposure_time` is still counted; the window
//! closes immediately after it.

use crate::binning::BinMapper;
use crate::config::HistogramConfig;
use crate::error::AcquisitionError;
use crate::event::{DetectionEvent, EventBatch, EventSource};
use crate::result::{
    AccumulatorStatistics, AcquisitionResult, ArrayResult, CompletionReason, RunStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of a single acquisition run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing consumed yet.
    Idle,
    /// Polling the source.
    Running,
    /// Terminal: the run ended normally.
    Completed,
    /// Terminal: the source failed.
    Failed,
}

impl RunState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
///
/// Checked between batches; a cancelled run returns its partial histogram as
/// a completed result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests early termination.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a recorded event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Counted in this bin.
    Binned(usize),
    /// Position outside `[0, N)`; dropped.
    OutOfRange,
    /// Stamped after the exposure window; not consumed.
    BeyondWindow,
}

/// Bins events for one tube and tracks exposure time.
#[derive(Debug, Clone)]
pub struct HistogramAccumulator {
    config: HistogramConfig,
    mapper: BinMapper,
    counts: Vec<u64>,
    statistics: AccumulatorStatistics,
    state: RunState,
    start_time: Option<DateTime<Utc>>,
    elapsed_time: f64,
}

impl HistogramAccumulator {
    /// Creates an idle accumulator for a detector with `resolution` codes.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the config is invalid for this
    /// resolution. Nothing is allocated in that case.
    pub fn new(config: HistogramConfig, resolution: u32) -> Result<Self> {
        config.validate_for(resolution)?;
        let mapper = BinMapper::new(resolution, config.bin_count)?;
        Ok(Self {
            config,
            mapper,
            counts: vec![0; config.bin_count],
            statistics: AccumulatorStatistics::default(),
            state: RunState::Idle,
            start_time: None,
            elapsed_time: 0.0,
        })
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &HistogramConfig {
        &self.config
    }

    /// Bin mapping in use.
    #[must_use]
    pub fn mapper(&self) -> &BinMapper {
        &self.mapper
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Seconds of exposure covered so far.
    #[must_use]
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    /// Counts accumulated so far.
    #[must_use]
    pub fn histogram(&self) -> &[u64] {
        &self.counts
    }

    /// Event accounting so far.
    #[must_use]
    pub fn statistics(&self) -> &AccumulatorStatistics {
        &self.statistics
    }

    /// Starts the run now.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the accumulator is idle.
    pub fn begin(&mut self) -> Result<()> {
        self.begin_at(Utc::now())
    }

    /// Starts the run with an explicit wall-clock start time.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the accumulator is idle.
    pub fn begin_at(&mut self, start_time: DateTime<Utc>) -> Result<()> {
        self.expect_state(RunState::Idle)?;
        self.start_time = Some(start_time);
        self.state = RunState::Running;
        Ok(())
    }

    /// Bins one event.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the run is in progress.
    pub fn record(&mut self, event: &DetectionEvent) -> Result<Placement> {
        self.expect_state(RunState::Running)?;

        if event.timestamp > self.config.exposure_time {
            self.statistics.beyond_window += 1;
            self.observe(self.config.exposure_time);
            return Ok(Placement::BeyondWindow);
        }

        self.statistics.events_consumed += 1;
        self.observe(event.timestamp);

        match self.mapper.map(event.raw_position) {
            Some(bin) => {
                self.counts[bin] += 1;
                self.statistics.in_range += 1;
                Ok(Placement::Binned(bin))
            }
            None => {
                self.statistics.out_of_range += 1;
                debug!(
                    "dropping out-of-range position {} (resolution {})",
                    event.raw_position,
                    self.mapper.resolution()
                );
                Ok(Placement::OutOfRange)
            }
        }
    }

    /// Advances the exposure clock to `time`, capped at the exposure time.
    /// The clock never moves backwards.
    pub fn observe(&mut self, time: f64) {
        if time.is_finite() {
            let capped = time.min(self.config.exposure_time);
            if capped > self.elapsed_time {
                self.elapsed_time = capped;
            }
        }
    }

    /// Returns true once the exposure window has elapsed.
    #[must_use]
    pub fn window_closed(&self) -> bool {
        self.elapsed_time >= self.config.exposure_time
    }

    /// Ends the run normally and returns the result.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the run is in progress.
    pub fn finish(&mut self, reason: CompletionReason) -> Result<AcquisitionResult> {
        self.expect_state(RunState::Running)?;
        self.state = RunState::Completed;
        Ok(self.take_result(RunStatus::Completed(reason)))
    }

    /// Ends the run as failed and returns the partial result.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the run is in progress.
    pub fn fail(&mut self, reason: &str) -> Result<AcquisitionResult> {
        self.expect_state(RunState::Running)?;
        self.state = RunState::Failed;
        Ok(self.take_result(RunStatus::Failed {
            reason: reason.to_string(),
        }))
    }

    /// Polls `source` until the run ends.
    ///
    /// # Errors
    /// [`AcquisitionError::Configuration`] if the source resolution does not
    /// suit the config; [`AcquisitionError::InvalidState`] if the accumulator
    /// was already used;
    /// [`AcquisitionError::SourceUnavailable`] with the partial result if the
    /// source fails.
    pub fn run<S: EventSource>(
        mut self,
        source: &mut S,
        cancel: &CancelToken,
    ) -> std::result::Result<AcquisitionResult, AcquisitionError<AcquisitionResult>> {
        if source.resolution() != self.mapper.resolution() {
            return Err(Error::Configuration(format!(
                "source {} reports resolution {}, accumulator expects {}",
                source.name(),
                source.resolution(),
                self.mapper.resolution()
            ))
            .into());
        }
        drive(&mut self, source, cancel)
    }

    fn take_result(&mut self, status: RunStatus) -> AcquisitionResult {
        AcquisitionResult {
            start_time: self.start_time.unwrap_or_else(Utc::now),
            elapsed_time: self.elapsed_time,
            histogram: std::mem::take(&mut self.counts),
            resolution: self.mapper.resolution(),
            status,
            statistics: self.statistics,
        }
    }

    fn expect_state(&self, expected: RunState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }
}

/// Independent accumulators for several tubes fed from one stream.
///
/// Events are routed by [`DetectionEvent::channel`]; every tube shares the
/// same exposure clock.
#[derive(Debug, Clone)]
pub struct ArrayAccumulator {
    detectors: BTreeMap<u8, HistogramAccumulator>,
    exposure_time: f64,
    unrouted: u64,
    state: RunState,
    start_time: Option<DateTime<Utc>>,
}

impl ArrayAccumulator {
    /// Creates one idle accumulator per channel.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `channels` is empty or the config
    /// is invalid for `resolution`.
    pub fn new(config: HistogramConfig, resolution: u32, channels: &[u8]) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::Configuration(
                "at least one detector channel is required".to_string(),
            ));
        }
        let detectors = channels
            .iter()
            .map(|&ch| Ok((ch, HistogramAccumulator::new(config, resolution)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            detectors,
            exposure_time: config.exposure_time,
            unrouted: 0,
            state: RunState::Idle,
            start_time: None,
        })
    }

    /// Channels being accumulated, in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.detectors.keys().copied()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Accumulator for one channel.
    #[must_use]
    pub fn detector(&self, channel: u8) -> Option<&HistogramAccumulator> {
        self.detectors.get(&channel)
    }

    /// Polls `source` until the run ends.
    ///
    /// # Errors
    /// See [`HistogramAccumulator::run`].
    pub fn run<S: EventSource>(
        mut self,
        source: &mut S,
        cancel: &CancelToken,
    ) -> std::result::Result<ArrayResult, AcquisitionError<ArrayResult>> {
        let expected = self
            .detectors
            .values()
            .next()
            .map(|acc| acc.mapper().resolution());
        if expected != Some(source.resolution()) {
            return Err(Error::Configuration(format!(
                "source {} reports resolution {}, accumulator expects {:?}",
                source.name(),
                source.resolution(),
                expected
            ))
            .into());
        }
        drive(&mut self, source, cancel)
    }

    fn elapsed(&self) -> f64 {
        self.detectors
            .values()
            .map(HistogramAccumulator::elapsed_time)
            .fold(0.0, f64::max)
    }

    fn collect(&mut self, status: &RunStatus) -> Result<ArrayResult> {
        let elapsed_time = self.elapsed();
        let mut detectors = BTreeMap::new();
        for (&channel, acc) in &mut self.detectors {
            let result = match status {
                RunStatus::Completed(reason) => acc.finish(*reason)?,
                RunStatus::Failed { reason } => acc.fail(reason)?,
            };
            detectors.insert(channel, result);
        }
        Ok(ArrayResult {
            start_time: self.start_time.unwrap_or_else(Utc::now),
            elapsed_time,
            status: status.clone(),
            detectors,
            unrouted: self.unrouted,
        })
    }
}

/// Shared polling loop over single- and multi-tube accumulators.
trait Accumulate {
    type Output;

    fn begin(&mut self) -> Result<()>;
    fn ingest(&mut self, batch: &EventBatch) -> Result<()>;
    fn exposure_time(&self) -> f64;
    fn elapsed_time(&self) -> f64;
    fn window_closed(&self) -> bool;
    fn finish(&mut self, reason: CompletionReason) -> Result<Self::Output>;
    fn fail(&mut self, reason: &str) -> Result<Self::Output>;
}

impl Accumulate for HistogramAccumulator {
    type Output = AcquisitionResult;

    fn begin(&mut self) -> Result<()> {
        HistogramAccumulator::begin(self)
    }

    fn ingest(&mut self, batch: &EventBatch) -> Result<()> {
        for event in &batch.events {
            self.record(event)?;
        }
        if let Some(clock) = batch.clock {
            self.observe(clock);
        }
        Ok(())
    }

    fn exposure_time(&self) -> f64 {
        self.config.exposure_time
    }

    fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    fn window_closed(&self) -> bool {
        HistogramAccumulator::window_closed(self)
    }

    fn finish(&mut self, reason: CompletionReason) -> Result<AcquisitionResult> {
        HistogramAccumulator::finish(self, reason)
    }

    fn fail(&mut self, reason: &str) -> Result<AcquisitionResult> {
        HistogramAccumulator::fail(self, reason)
    }
}

impl Accumulate for ArrayAccumulator {
    type Output = ArrayResult;

    fn begin(&mut self) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(Error::InvalidState {
                expected: RunState::Idle.as_str(),
                found: self.state.as_str(),
            });
        }
        let start = Utc::now();
        for acc in self.detectors.values_mut() {
            acc.begin_at(start)?;
        }
        self.start_time = Some(start);
        self.state = RunState::Running;
        Ok(())
    }

    fn ingest(&mut self, batch: &EventBatch) -> Result<()> {
        for event in &batch.events {
            match self.detectors.get_mut(&event.channel) {
                Some(acc) => {
                    acc.record(event)?;
                }
                None if event.timestamp <= self.exposure_time => self.unrouted += 1,
                None => {}
            }
        }
        if let Some(latest) = batch.latest_time() {
            for acc in self.detectors.values_mut() {
                acc.observe(latest);
            }
        }
        Ok(())
    }

    fn exposure_time(&self) -> f64 {
        self.exposure_time
    }

    fn elapsed_time(&self) -> f64 {
        self.elapsed()
    }

    fn window_closed(&self) -> bool {
        self.elapsed() >= self.exposure_time
    }

    fn finish(&mut self, reason: CompletionReason) -> Result<ArrayResult> {
        let result = self.collect(&RunStatus::Completed(reason))?;
        self.state = RunState::Completed;
        Ok(result)
    }

    fn fail(&mut self, reason: &str) -> Result<ArrayResult> {
        let result = self.collect(&RunStatus::Failed {
            reason: reason.to_string(),
        })?;
        self.state = RunState::Failed;
        Ok(result)
    }
}

fn drive<A, S>(
    acc: &mut A,
    source: &mut S,
    cancel: &CancelToken,
) -> std::result::Result<A::Output, AcquisitionError<A::Output>>
where
    A: Accumulate,
    S: EventSource,
{
    acc.begin()?;
    let deadline = acc.exposure_time();
    info!(
        "acquisition started on {} ({} s exposure)",
        source.name(),
        deadline
    );

    let mut batches = 0u64;
    loop {
        if cancel.is_cancelled() {
            info!(
                "acquisition cancelled after {:.3} s ({batches} batches)",
                acc.elapsed_time()
            );
            return Ok(acc.finish(CompletionReason::Cancelled)?);
        }

        let batch = match source.next_batch(deadline) {
            Ok(batch) => batch,
            Err(err) => {
                let reason = match err {
                    Error::SourceUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                let elapsed_time = acc.elapsed_time();
                warn!("acquisition failed after {elapsed_time:.3} s: {reason}");
                let partial = acc.fail(&reason)?;
                return Err(AcquisitionError::SourceUnavailable {
                    reason,
                    elapsed_time,
                    partial: Box::new(partial),
                });
            }
        };
        batches += 1;
        acc.ingest(&batch)?;
        debug!(
            "batch {batches}: {} events, elapsed {:.3} s",
            batch.len(),
            acc.elapsed_time()
        );

        if acc.window_closed() {
            info!("exposure window of {deadline} s elapsed after {batches} batches");
            return Ok(acc.finish(CompletionReason::WindowElapsed)?);
        }
        if batch.exhausted {
            info!(
                "source exhausted after {:.3} s ({batches} batches)",
                acc.elapsed_time()
            );
            return Ok(acc.finish(CompletionReason::SourceExhausted)?);
        }
    }
}

/// Runs one acquisition of `source` into a single histogram.
///
/// # Errors
/// [`AcquisitionError::Configuration`] before anything is consumed if the
/// config is invalid; [`AcquisitionError::SourceUnavailable`] with the partial
/// result if the source fails.
pub fn acquire<S: EventSource>(
    source: &mut S,
    config: HistogramConfig,
    cancel: &CancelToken,
) -> std::result::Result<AcquisitionResult, AcquisitionError<AcquisitionResult>> {
    let accumulator = HistogramAccumulator::new(config, source.resolution())?;
    accumulator.run(source, cancel)
}

/// Runs one acquisition of `source` into one histogram per channel.
///
/// # Errors
/// See [`acquire`].
pub fn acquire_array<S: EventSource>(
    source: &mut S,
    config: HistogramConfig,
    channels: &[u8],
    cancel: &CancelToken,
) -> std::result::Result<ArrayResult, AcquisitionError<ArrayResult>> {
    let accumulator = ArrayAccumulator::new(config, source.resolution(), channels)?;
    accumulator.run(source, cancel)
}
