//! Detection events and the event source contract.

use crate::Result;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single neutron detection reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionEvent {
    /// Position code in the detector's native resolution.
    pub raw_position: u32,
    /// Seconds since acquisition start (non-negative).
    pub timestamp: f64,
    /// PSD tube number the event came from.
    pub channel: u8,
}

impl DetectionEvent {
    /// Creates an event on channel 0.
    #[inline]
    #[must_use]
    pub fn new(raw_position: u32, timestamp: f64) -> Self {
        Self {
            raw_position,
            timestamp,
            channel: 0,
        }
    }

    /// Sets the PSD channel.
    #[inline]
    #[must_use]
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

/// One poll's worth of events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    /// Events with `timestamp <= deadline`, in arrival order.
    pub events: Vec<DetectionEvent>,
    /// No further events will ever be produced.
    pub exhausted: bool,
    /// Latest source time observed while filling this batch, in seconds
    /// since acquisition start. May run ahead of the last event.
    pub clock: Option<f64>,
}

impl EventBatch {
    /// Creates a batch from events.
    #[must_use]
    pub fn new(events: Vec<DetectionEvent>) -> Self {
        Self {
            events,
            exhausted: false,
            clock: None,
        }
    }

    /// An empty batch marking the end of the stream.
    #[must_use]
    pub fn exhausted() -> Self {
        Self {
            events: Vec::new(),
            exhausted: true,
            clock: None,
        }
    }

    /// Marks the batch as the last one.
    #[must_use]
    pub fn with_exhausted(mut self, exhausted: bool) -> Self {
        self.exhausted = exhausted;
        self
    }

    /// Records the source clock.
    #[must_use]
    pub fn with_clock(mut self, clock: f64) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the batch carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Latest time known from this batch: the clock or the newest event.
    #[must_use]
    pub fn latest_time(&self) -> Option<f64> {
        let newest = self.events.iter().map(|e| e.timestamp).reduce(f64::max);
        match (newest, self.clock) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Acquisition channel producing detection events.
///
/// Implementations cover hardware polling, capture replay and simulation.
/// The accumulator polls repeatedly with the same `deadline` (the exposure
/// time); a well-behaved source returns promptly once its clock passes the
/// deadline, even with an empty batch.
pub trait EventSource {
    /// Native resolution R: the largest raw position code plus one.
    fn resolution(&self) -> u32;

    /// Pulls the next batch of events with `timestamp <= deadline`.
    ///
    /// # Errors
    /// Returns [`crate::Error::SourceUnavailable`] if communication fails.
    /// The current run is aborted; retries are the caller's business.
    fn next_batch(&mut self, deadline: f64) -> Result<EventBatch>;

    /// Short human-readable name used in log messages.
    fn name(&self) -> &'static str {
        "event-source"
    }
}

impl<S: EventSource + ?Sized> EventSource for &mut S {
    fn resolution(&self) -> u32 {
        (**self).resolution()
    }

    fn next_batch(&mut self, deadline: f64) -> Result<EventBatch> {
        (**self).next_batch(deadline)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn resolution(&self) -> u32 {
        (**self).resolution()
    }

    fn next_batch(&mut self, deadline: f64) -> Result<EventBatch> {
        (**self).next_batch(deadline)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = DetectionEvent::new(120, 1.5).on_channel(7);
        assert_eq!(event.raw_position, 120);
        assert_eq!(event.channel, 7);
        assert!((event.timestamp - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_batch_latest_time() {
        let batch = EventBatch::new(vec![
            DetectionEvent::new(1, 0.5),
            DetectionEvent::new(2, 2.0),
            DetectionEvent::new(3, 1.0),
        ]);
        assert_eq!(batch.latest_time(), Some(2.0));

        let batch = batch.with_clock(3.0);
        assert_eq!(batch.latest_time(), Some(3.0));

        assert_eq!(EventBatch::default().latest_time(), None);
        assert_eq!(EventBatch::exhausted().with_clock(4.0).latest_time(), Some(4.0));
    }
}
