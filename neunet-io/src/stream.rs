//! Event source over a NEUNET packet stream.
//!
//! The stream is read eight bytes at a time after synchronising on the first
//! valid start byte. The first instrument-time packet defines t = 0; neutron
//! events seen before it are dropped. Every later neutron event is stamped
//! with the most recent instrument time, so the exposure clock advances in
//! the board's own time steps.

use log::{debug, info, warn};
use neunet_core::{DetectionEvent, EventBatch, EventSource};
use neunet_proto::{is_start_byte, InstrumentTime, NeunetPacket, ResolutionMode, PACKET_SIZE};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind, Read};

/// Default maximum events per batch.
pub const DEFAULT_MAX_BATCH: usize = 4096;
/// Default number of packets read per poll before yielding.
pub const DEFAULT_PACKETS_PER_POLL: usize = 65_536;

/// Decoding and batching options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamConfig {
    /// Pulse-height layout of neutron events.
    pub resolution_mode: ResolutionMode,
    /// PSD tubes to keep; `None` keeps all.
    pub channels: Option<Vec<u8>>,
    /// Maximum events per batch.
    pub max_batch: usize,
    /// Packets read per poll before returning, even without events.
    pub packets_per_poll: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resolution_mode: ResolutionMode::default(),
            channels: None,
            max_batch: DEFAULT_MAX_BATCH,
            packets_per_poll: DEFAULT_PACKETS_PER_POLL,
        }
    }
}

impl StreamConfig {
    /// Creates a stream configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resolution mode.
    #[must_use]
    pub fn with_resolution_mode(mut self, mode: ResolutionMode) -> Self {
        self.resolution_mode = mode;
        self
    }

    /// Keeps only events from these PSD tubes.
    #[must_use]
    pub fn with_channels(mut self, channels: Vec<u8>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Sets the maximum events per batch (at least 1).
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Sets the packets read per poll (at least 1).
    #[must_use]
    pub fn with_packets_per_poll(mut self, packets: usize) -> Self {
        self.packets_per_poll = packets.max(1);
        self
    }

    fn accepts(&self, psd: u8) -> bool {
        self.channels
            .as_ref()
            .map_or(true, |channels| channels.contains(&psd))
    }
}

/// Packet accounting for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamStatistics {
    /// Complete packets read.
    pub packets: u64,
    /// Bytes discarded while synchronising.
    pub skipped_bytes: u64,
    /// Bytes of an incomplete packet at end of stream.
    pub truncated_bytes: u64,
    /// Neutron event packets.
    pub neutrons: u64,
    /// Neutron events before the first instrument time.
    pub before_start: u64,
    /// Neutron events on tubes not selected.
    pub filtered: u64,
    /// Neutron events with zero total pulse height.
    pub zero_pulse: u64,
    /// Trigger id packets.
    pub triggers: u64,
    /// Instrument time packets.
    pub instrument_times: u64,
    /// Packets with an unknown lead byte.
    pub unknown: u64,
}

/// [`EventSource`] decoding a NEUNET stream from any reader: a TCP socket or
/// a captured file.
///
/// End of stream reports exhaustion; read errors and socket timeouts report
/// [`neunet_core::Error::SourceUnavailable`].
pub struct PacketStreamSource<R> {
    reader: R,
    config: StreamConfig,
    synced: bool,
    start: Option<InstrumentTime>,
    latest: Option<InstrumentTime>,
    stats: StreamStatistics,
    exhausted: bool,
}

impl<R: Read> PacketStreamSource<R> {
    /// Wraps a reader positioned anywhere in a stream.
    pub fn new(reader: R, config: StreamConfig) -> Self {
        Self {
            reader,
            config,
            synced: false,
            start: None,
            latest: None,
            stats: StreamStatistics::default(),
            exhausted: false,
        }
    }

    /// Stream configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Packet accounting so far.
    #[must_use]
    pub fn statistics(&self) -> &StreamStatistics {
        &self.stats
    }

    /// Instrument time that defined t = 0.
    #[must_use]
    pub fn start_time(&self) -> Option<InstrumentTime> {
        self.start
    }

    /// Most recent instrument time.
    #[must_use]
    pub fn latest_time(&self) -> Option<InstrumentTime> {
        self.latest
    }

    /// Seconds from the start time to the latest instrument time.
    #[must_use]
    pub fn clock(&self) -> Option<f64> {
        Some(self.latest?.seconds_since(self.start?).max(0.0))
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next raw packet, synchronising on the first start byte.
    /// Returns `None` at end of stream.
    ///
    /// # Errors
    /// Propagates read errors, including socket timeouts.
    pub fn next_packet(&mut self) -> io::Result<Option<[u8; PACKET_SIZE]>> {
        let mut packet = [0u8; PACKET_SIZE];
        let mut filled = 0;

        if !self.synced {
            let mut byte = [0u8; 1];
            loop {
                if fill(&mut self.reader, &mut byte)? == 0 {
                    return Ok(None);
                }
                if is_start_byte(byte[0]) {
                    break;
                }
                self.stats.skipped_bytes += 1;
            }
            if self.stats.skipped_bytes > 0 {
                debug!(
                    "synchronised after skipping {} bytes",
                    self.stats.skipped_bytes
                );
            }
            packet[0] = byte[0];
            filled = 1;
            self.synced = true;
        }

        let read = filled + fill(&mut self.reader, &mut packet[filled..])?;
        if read == 0 {
            return Ok(None);
        }
        if read < PACKET_SIZE {
            self.stats.truncated_bytes += read as u64;
            warn!("stream ended inside a packet ({read} of {PACKET_SIZE} bytes)");
            return Ok(None);
        }
        self.stats.packets += 1;
        Ok(Some(packet))
    }

    fn ingest(&mut self, raw: &[u8; PACKET_SIZE], events: &mut Vec<DetectionEvent>) {
        match NeunetPacket::parse(raw, self.config.resolution_mode) {
            NeunetPacket::InstrumentTime { time } => {
                self.stats.instrument_times += 1;
                if self.start.is_none() {
                    info!("stream start at instrument time {time}");
                    self.start = Some(time);
                }
                self.latest = Some(time);
            }
            NeunetPacket::Neutron(event) => {
                self.stats.neutrons += 1;
                let Some(clock) = self.clock() else {
                    self.stats.before_start += 1;
                    return;
                };
                if !self.config.accepts(event.psd) {
                    self.stats.filtered += 1;
                    return;
                }
                match event.raw_position(self.config.resolution_mode.resolution()) {
                    Some(raw_position) => {
                        events.push(DetectionEvent::new(raw_position, clock).on_channel(event.psd));
                    }
                    None => self.stats.zero_pulse += 1,
                }
            }
            NeunetPacket::Trigger { .. } => self.stats.triggers += 1,
            NeunetPacket::Unknown { raw } => {
                self.stats.unknown += 1;
                debug!("unknown packet {raw:02x?}");
            }
        }
    }
}

impl<R: Read> EventSource for PacketStreamSource<R> {
    fn resolution(&self) -> u32 {
        self.config.resolution_mode.resolution()
    }

    fn next_batch(&mut self, deadline: f64) -> neunet_core::Result<EventBatch> {
        let mut events = Vec::new();
        let mut polled = 0;

        while !self.exhausted
            && events.len() < self.config.max_batch
            && polled < self.config.packets_per_poll
        {
            if self.clock().is_some_and(|clock| clock >= deadline) {
                break;
            }
            match self.next_packet() {
                Ok(Some(raw)) => self.ingest(&raw, &mut events),
                Ok(None) => {
                    info!("stream ended after {} packets", self.stats.packets);
                    self.exhausted = true;
                }
                Err(err) => return Err(source_error(&err)),
            }
            polled += 1;
        }

        let mut batch = EventBatch::new(events).with_exhausted(self.exhausted);
        if let Some(clock) = self.clock() {
            batch = batch.with_clock(clock);
        }
        Ok(batch)
    }

    fn name(&self) -> &'static str {
        "neunet-stream"
    }
}

// Reads until `buf` is full or the stream ends; returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(read)
}

fn source_error(err: &io::Error) -> neunet_core::Error {
    let reason = match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            format!("timed out waiting for detector data: {err}")
        }
        _ => format!("detector stream failed: {err}"),
    };
    neunet_core::Error::SourceUnavailable(reason)
}
