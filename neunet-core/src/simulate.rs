//! Event sources that need no hardware: scripted replay and uniform
//! illumination.
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use crate::event::{DetectionEvent, EventBatch, EventSource};
use crate::{Error, Result};
use std::collections::VecDeque;

/// Default number of events handed out per poll.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Replays a fixed list of events, optionally failing part way through.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    resolution: u32,
    pending: VecDeque<DetectionEvent>,
    batch_size: usize,
    fail_after: Option<u64>,
    end_clock: Option<f64>,
    delivered: u64,
}

impl ScriptedSource {
    /// Creates a source replaying `events` in order.
    #[must_use]
    pub fn new(resolution: u32, events: Vec<DetectionEvent>) -> Self {
        Self {
            resolution,
            pending: events.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            fail_after: None,
            end_clock: None,
            delivered: 0,
        }
    }

    /// Sets the maximum events per batch (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reports [`Error::SourceUnavailable`] once `events` have been delivered.
    #[must_use]
    pub fn fail_after(mut self, events: u64) -> Self {
        self.fail_after = Some(events);
        self
    }

    /// Clock value reported with the final batch.
    #[must_use]
    pub fn with_end_clock(mut self, clock: f64) -> Self {
        self.end_clock = Some(clock);
        self
    }

    /// Events handed out so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl EventSource for ScriptedSource {
    fn resolution(&self) -> u32 {
        self.resolution
    }

    fn next_batch(&mut self, deadline: f64) -> Result<EventBatch> {
        let mut limit = self.batch_size;
        if let Some(fail_after) = self.fail_after {
            let remaining = fail_after.saturating_sub(self.delivered);
            if remaining == 0 {
                return Err(Error::SourceUnavailable(format!(
                    "scripted failure after {} events",
                    self.delivered
                )));
            }
            limit = limit.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }

        let mut events = Vec::with_capacity(limit.min(self.pending.len()));
        while events.len() < limit {
            match self.pending.front() {
                Some(next) if next.timestamp > deadline => {
                    // The next event lies past the window; its time tells the
                    // accumulator the window has closed.
                    let clock = next.timestamp;
                    self.delivered += events.len() as u64;
                    return Ok(EventBatch::new(events).with_clock(clock));
                }
                Some(_) => events.extend(self.pending.pop_front()),
                None => break,
            }
        }
        self.delivered += events.len() as u64;

        let mut batch = EventBatch::new(events).with_exhausted(self.pending.is_empty());
        if batch.exhausted {
            if let Some(clock) = self.end_clock {
                batch = batch.with_clock(clock);
            }
        }
        Ok(batch)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Synthetic source illuminating the tube uniformly.
///
/// Emits `total` events with positions spread evenly over `[0, R)` and
/// timestamps spread evenly over `[0, duration)`, then reports the clock at
/// `duration` and exhaustion.
#[derive(Debug, Clone)]
pub struct UniformSource {
    resolution: u32,
    total: u64,
    duration: f64,
    channels: Vec<u8>,
    batch_size: usize,
    next: u64,
}

impl UniformSource {
    /// Creates a uniform source on channel 0.
    #[must_use]
    pub fn new(resolution: u32, total: u64, duration: f64) -> Self {
        Self {
            resolution,
            total,
            duration,
            channels: vec![0],
            batch_size: DEFAULT_BATCH_SIZE,
            next: 0,
        }
    }

    /// Cycles events over these channels in turn.
    #[must_use]
    pub fn with_channels(mut self, channels: &[u8]) -> Self {
        if !channels.is_empty() {
            self.channels = channels.to_vec();
        }
        self
    }

    /// Sets the maximum events per batch (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn event(&self, i: u64) -> DetectionEvent {
        let raw_position =
            (u128::from(i) * u128::from(self.resolution) / u128::from(self.total)) as u32;
        let timestamp = i as f64 * self.duration / self.total as f64;
        let channel = self.channels[(i % self.channels.len() as u64) as usize];
        DetectionEvent::new(raw_position, timestamp).on_channel(channel)
    }
}

impl EventSource for UniformSource {
    fn resolution(&self) -> u32 {
        self.resolution
    }

    fn next_batch(&mut self, deadline: f64) -> Result<EventBatch> {
        let mut events = Vec::with_capacity(self.batch_size);
        while events.len() < self.batch_size && self.next < self.total {
            let event = self.event(self.next);
            if event.timestamp > deadline {
                return Ok(EventBatch::new(events).with_clock(event.timestamp));
            }
            events.push(event);
            self.next += 1;
        }

        if self.next >= self.total {
            Ok(EventBatch::new(events)
                .with_exhausted(true)
                .with_clock(self.duration))
        } else {
            Ok(EventBatch::new(events))
        }
    }

    fn name(&self) -> &'static str {
        "uniform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_batches_and_exhaustion() {
        let events = (0..5).map(|i| DetectionEvent::new(i, f64::from(i))).collect();
        let mut source = ScriptedSource::new(10, events).with_batch_size(2);

        assert_eq!(source.next_batch(100.0).unwrap().len(), 2);
        assert_eq!(source.next_batch(100.0).unwrap().len(), 2);
        let last = source.next_batch(100.0).unwrap();
        assert_eq!(last.len(), 1);
        assert!(last.exhausted);
        assert_eq!(source.delivered(), 5);
    }

    #[test]
    fn test_scripted_stops_at_deadline() {
        let events = vec![DetectionEvent::new(1, 0.5), DetectionEvent::new(2, 3.0)];
        let mut source = ScriptedSource::new(10, events);
        let batch = source.next_batch(2.0).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch.exhausted);
        assert_eq!(batch.clock, Some(3.0));
    }

    #[test]
    fn test_scripted_failure_point() {
        let events = (0..10).map(|i| DetectionEvent::new(i, 0.0)).collect();
        let mut source = ScriptedSource::new(10, events)
            .with_batch_size(4)
            .fail_after(6);
        assert_eq!(source.next_batch(1.0).unwrap().len(), 4);
        assert_eq!(source.next_batch(1.0).unwrap().len(), 2);
        let err = source.next_batch(1.0).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[test]
    fn test_uniform_positions_for_huge_totals() {
        let source = UniformSource::new(16_384, u64::MAX, 1.0);
        assert_eq!(source.event(u64::MAX - 1).raw_position, 16_383);
        assert_eq!(source.event(0).raw_position, 0);
    }

    #[test]
    fn test_uniform_spans_range() {
        let mut source = UniformSource::new(1000, 10, 5.0).with_channels(&[0, 7]);
        let batch = source.next_batch(5.0).unwrap();
        assert_eq!(batch.len(), 10);
        assert!(batch.exhausted);
        assert_eq!(batch.clock, Some(5.0));
        assert_eq!(batch.events[0].raw_position, 0);
        assert_eq!(batch.events[9].raw_position, 900);
        assert_eq!(batch.events[1].channel, 7);
        assert!((batch.events[9].timestamp - 4.5).abs() < 1e-12);
    }
}
