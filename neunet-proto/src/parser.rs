//! Bulk parsing of captured NEUNET streams.

use crate::packet::{is_start_byte, NeunetPacket, ResolutionMode, PACKET_SIZE};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for the stream parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Pulse-height layout of neutron events.
    pub resolution_mode: ResolutionMode,
    /// Whether to drop everything but neutron events.
    pub neutrons_only: bool,
    /// Whether to use parallel parsing.
    pub parallel: bool,
    /// Packet count above which parsing goes parallel.
    pub chunk_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            resolution_mode: ResolutionMode::default(),
            neutrons_only: false,
            parallel: true,
            chunk_size: 1024 * 1024,
        }
    }
}

impl ParserConfig {
    /// Creates a parser configuration with default values.
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

    /// Sets whether to keep neutron events only.
    #[must_use]
    pub fn with_neutrons_only(mut self, neutrons_only: bool) -> Self {
        self.neutrons_only = neutrons_only;
        self
    }

    /// Sets whether to use parallel parsing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the parallel threshold.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// Packets recovered from a byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStream {
    /// Decoded packets in stream order.
    pub packets: Vec<NeunetPacket>,
    /// Bytes skipped before the first start byte.
    pub skipped: usize,
    /// Incomplete bytes left at the end.
    pub trailing: usize,
}

/// Offset of the first byte that can start a packet.
#[must_use]
pub fn sync_offset(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| is_start_byte(b))
}

/// NEUNET stream parser.
#[derive(Debug, Clone, Default)]
pub struct PacketParser {
    config: ParserConfig,
}

impl PacketParser {
    /// Creates a parser with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser with the given configuration.
    #[must_use]
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parser configuration.
    #[must_use]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Synchronises on the first start byte, then decodes consecutive
    /// 8-byte packets.
    #[must_use]
    pub fn parse_bytes(&self, data: &[u8]) -> ParsedStream {
        let Some(skipped) = sync_offset(data) else {
            return ParsedStream {
                packets: Vec::new(),
                skipped: data.len(),
                trailing: 0,
            };
        };
        let body = &data[skipped..];
        let trailing = body.len() % PACKET_SIZE;
        let body = &body[..body.len() - trailing];

        let packets = if self.config.parallel && body.len() / PACKET_SIZE > self.config.chunk_size
        {
            self.parse_parallel(body)
        } else {
            self.parse_sequential(body)
        };

        ParsedStream {
            packets,
            skipped,
            trailing,
        }
    }

    fn decode(&self, chunk: &[u8]) -> Option<NeunetPacket> {
        let packet = NeunetPacket::from_slice(chunk, self.config.resolution_mode).ok()?;
        (!self.config.neutrons_only || packet.is_neutron()).then_some(packet)
    }

    fn parse_sequential(&self, body: &[u8]) -> Vec<NeunetPacket> {
        body.chunks_exact(PACKET_SIZE)
            .filter_map(|chunk| self.decode(chunk))
            .collect()
    }

    fn parse_parallel(&self, body: &[u8]) -> Vec<NeunetPacket> {
        body.par_chunks_exact(PACKET_SIZE)
            .filter_map(|chunk| self.decode(chunk))
            .collect()
    }
}
