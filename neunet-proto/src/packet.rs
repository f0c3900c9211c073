//! NEUNET event-stream packets.
//!
//! Every packet is eight bytes and the first byte names its kind:
//!
//! | byte 0 | kind            | payload |
//! |--------|-----------------|---------|
//! | `0x5F` | neutron event   | 24-bit time in 25 ns ticks, PSD, left/right pulse heights |
//! | `0x5B` | trigger id      | 24-bit id |
//! | `0x6C` | instrument time | five-byte [`InstrumentTime`] |
#![allow(clippy::cast_possible_truncation)]

use crate::time::InstrumentTime;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of one stream packet in bytes.
pub const PACKET_SIZE: usize = 8;
/// Lead byte of a neutron event packet.
pub const NEUTRON_EVENT: u8 = 0x5F;
/// Lead byte of a trigger id packet.
pub const TRIGGER_ID: u8 = 0x5B;
/// Lead byte of an instrument time packet.
pub const INSTRUMENT_TIME: u8 = 0x6C;
/// Lead bytes a stream may be synchronised on.
pub const START_BYTES: [u8; 3] = [NEUTRON_EVENT, TRIGGER_ID, INSTRUMENT_TIME];

/// Seconds per neutron time tick (25 ns).
pub const TICK_SECONDS: f64 = 25e-9;

/// Returns true if `byte` can start a packet.
#[inline]
#[must_use]
pub fn is_start_byte(byte: u8) -> bool {
    START_BYTES.contains(&byte)
}

/// Pulse-height digitisation of neutron events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ResolutionMode {
    /// 12-bit pulse heights.
    Bits12,
    /// 14-bit pulse heights (high-resolution mode).
    #[default]
    Bits14,
}

impl ResolutionMode {
    /// Bits per pulse height.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Bits12 => 12,
            Self::Bits14 => 14,
        }
    }

    /// Native position resolution R used when converting a pulse ratio to a
    /// raw position code.
    #[must_use]
    pub fn resolution(self) -> u32 {
        1 << self.bits()
    }
}

impl TryFrom<u8> for ResolutionMode {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            12 => Ok(Self::Bits12),
            14 => Ok(Self::Bits14),
            other => Err(Error::UnsupportedResolution(other)),
        }
    }
}

impl From<ResolutionMode> for u8 {
    fn from(mode: ResolutionMode) -> Self {
        mode.bits()
    }
}

impl FromStr for ResolutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().trim_end_matches("-bit").trim_end_matches("bit");
        let bits: u8 = digits
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("resolution mode '{s}'")))?;
        Self::try_from(bits)
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// A decoded neutron event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeutronEvent {
    /// Event time in 25 ns ticks (24 bits).
    pub time_ticks: u32,
    /// PSD tube number, 0-7.
    pub psd: u8,
    /// Pulse height at the left end of the tube.
    pub pulse_left: u16,
    /// Pulse height at the right end of the tube.
    pub pulse_right: u16,
}

impl NeutronEvent {
    /// Decodes bytes 1-7 of a `0x5F` packet.
    #[must_use]
    pub fn decode(b: &[u8; PACKET_SIZE], mode: ResolutionMode) -> Self {
        let time_ticks = u32::from_be_bytes([0, b[1], b[2], b[3]]);
        let (psd, pulse_left, pulse_right) = match mode {
            ResolutionMode::Bits14 => (
                (b[4] >> 4) & 0x07,
                (u16::from(b[4] & 0x0F) << 10) | (u16::from(b[5]) << 2) | u16::from(b[6] >> 6),
                (u16::from(b[6] & 0x3F) << 8) | u16::from(b[7]),
            ),
            ResolutionMode::Bits12 => (
                b[4] & 0x07,
                (u16::from(b[5]) << 4) | u16::from(b[6] >> 4),
                (u16::from(b[6] & 0x0F) << 8) | u16::from(b[7]),
            ),
        };
        Self {
            time_ticks,
            psd,
            pulse_left,
            pulse_right,
        }
    }

    /// Encodes back into a packet. Pulse heights are masked to the mode's
    /// width.
    #[must_use]
    pub fn encode(&self, mode: ResolutionMode) -> [u8; PACKET_SIZE] {
        let t = self.time_ticks.to_be_bytes();
        let (l, r) = (self.pulse_left, self.pulse_right);
        let (b4, b5, b6, b7) = match mode {
            ResolutionMode::Bits14 => (
                ((self.psd & 0x07) << 4) | ((l >> 10) as u8 & 0x0F),
                (l >> 2) as u8,
                ((l as u8 & 0x03) << 6) | ((r >> 8) as u8 & 0x3F),
                r as u8,
            ),
            ResolutionMode::Bits12 => (
                self.psd & 0x07,
                (l >> 4) as u8,
                ((l as u8 & 0x0F) << 4) | ((r >> 8) as u8 & 0x0F),
                r as u8,
            ),
        };
        [NEUTRON_EVENT, t[1], t[2], t[3], b4, b5, b6, b7]
    }

    /// Event time in seconds.
    #[must_use]
    pub fn time_seconds(&self) -> f64 {
        f64::from(self.time_ticks) * TICK_SECONDS
    }

    /// Total pulse height.
    #[must_use]
    pub fn pulse_height(&self) -> u32 {
        u32::from(self.pulse_left) + u32::from(self.pulse_right)
    }

    /// Position along the tube as `left / (left + right)`, in `[0, 1]`.
    /// `None` if both pulses are zero.
    #[must_use]
    pub fn position_ratio(&self) -> Option<f64> {
        match self.pulse_height() {
            0 => None,
            height => Some(f64::from(self.pulse_left) / f64::from(height)),
        }
    }

    /// Raw position code `min(floor(ratio * R), R - 1)`, computed exactly in
    /// integers. `None` if both pulses are zero or `resolution` is zero.
    #[must_use]
    pub fn raw_position(&self, resolution: u32) -> Option<u32> {
        let height = u64::from(self.pulse_height());
        if height == 0 || resolution == 0 {
            return None;
        }
        let code = u64::from(self.pulse_left) * u64::from(resolution) / height;
        Some((code as u32).min(resolution - 1))
    }
}

/// One decoded stream packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NeunetPacket {
    /// `0x5F`: a neutron hit.
    Neutron(NeutronEvent),
    /// `0x5B`: a trigger id.
    Trigger {
        /// 24-bit trigger id.
        id: u32,
    },
    /// `0x6C`: the board clock.
    InstrumentTime {
        /// Decoded clock value.
        time: InstrumentTime,
    },
    /// Any other lead byte.
    Unknown {
        /// The undecoded packet.
        raw: [u8; PACKET_SIZE],
    },
}

impl NeunetPacket {
    /// Decodes one packet. Unknown lead bytes are not an error.
    #[must_use]
    pub fn parse(bytes: &[u8; PACKET_SIZE], mode: ResolutionMode) -> Self {
        match bytes[0] {
            NEUTRON_EVENT => Self::Neutron(NeutronEvent::decode(bytes, mode)),
            TRIGGER_ID => Self::Trigger {
                id: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
            },
            INSTRUMENT_TIME => Self::InstrumentTime {
                time: InstrumentTime::new(
                    u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
                    bytes[5],
                ),
            },
            _ => Self::Unknown { raw: *bytes },
        }
    }

    /// Decodes the first eight bytes of a slice.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than eight bytes are given.
    pub fn from_slice(bytes: &[u8], mode: ResolutionMode) -> Result<Self> {
        let packet: &[u8; PACKET_SIZE] = bytes
            .get(..PACKET_SIZE)
            .and_then(|head| head.try_into().ok())
            .ok_or(Error::Truncated {
                expected: PACKET_SIZE,
                found: bytes.len(),
            })?;
        Ok(Self::parse(packet, mode))
    }

    /// Encodes an instrument time packet.
    #[must_use]
    pub fn encode_instrument_time(time: InstrumentTime) -> [u8; PACKET_SIZE] {
        let t = time.to_bytes();
        [INSTRUMENT_TIME, t[0], t[1], t[2], t[3], t[4], 0, 0]
    }

    /// Returns true for neutron events.
    #[must_use]
    pub fn is_neutron(&self) -> bool {
        matches!(self, Self::Neutron(_))
    }

    /// The neutron event, if this is one.
    #[must_use]
    pub fn as_neutron(&self) -> Option<&NeutronEvent> {
        match self {
            Self::Neutron(event) => Some(event),
            _ => None,
        }
    }
}

impl fmt::Display for NeunetPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neutron(event) => {
                write!(
                    f,
                    "neutron psd={} left={} right={} t={:.6} s",
                    event.psd,
                    event.pulse_left,
                    event.pulse_right,
                    event.time_seconds()
                )?;
                match event.position_ratio() {
                    Some(ratio) => write!(f, " position={ratio:.5}"),
                    None => f.write_str(" position=none"),
                }
            }
            Self::Trigger { id } => write!(f, "trigger id={id}"),
            Self::InstrumentTime { time } => write!(f, "instrument time {time}"),
            Self::Unknown { raw } => write!(f, "unknown {raw:02x?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_14bit() {
        // psd 7, left 0x2345, right 0x1ABC
        let bytes = [0x5F, 0x00, 0x01, 0x00, 0x78, 0xD1, 0x5A, 0xBC];
        let packet = NeunetPacket::parse(&bytes, ResolutionMode::Bits14);
        let event = packet.as_neutron().copied().unwrap();
        assert_eq!(event.psd, 7);
        assert_eq!(event.pulse_left, 0x2345);
        assert_eq!(event.pulse_right, 0x1ABC);
        assert_eq!(event.time_ticks, 256);
        assert_relative_eq!(event.time_seconds(), 6.4e-6);
    }

    #[test]
    fn test_decode_12bit() {
        let bytes = [0x5F, 0, 0, 0, 0x03, 0xAB, 0xCD, 0xEF];
        let event = NeutronEvent::decode(&bytes, ResolutionMode::Bits12);
        assert_eq!(event.psd, 3);
        assert_eq!(event.pulse_left, 0xABC);
        assert_eq!(event.pulse_right, 0xDEF);
    }

    #[test]
    fn test_encode_matches_decode() {
        for mode in [ResolutionMode::Bits12, ResolutionMode::Bits14] {
            let max = (1u16 << mode.bits()) - 1;
            let event = NeutronEvent {
                time_ticks: 0x00AB_CDEF,
                psd: 5,
                pulse_left: max,
                pulse_right: max / 3,
            };
            assert_eq!(NeutronEvent::decode(&event.encode(mode), mode), event);
        }
    }

    #[test]
    fn test_position_ratio_and_code() {
        let event = NeutronEvent {
            time_ticks: 0,
            psd: 0,
            pulse_left: 100,
            pulse_right: 300,
        };
        assert_relative_eq!(event.position_ratio().unwrap(), 0.25);
        assert_eq!(event.raw_position(16_384), Some(4096));

        let all_left = NeutronEvent {
            pulse_right: 0,
            ..event
        };
        assert_eq!(all_left.raw_position(16_384), Some(16_383));

        let dead = NeutronEvent {
            pulse_left: 0,
            pulse_right: 0,
            ..event
        };
        assert_eq!(dead.position_ratio(), None);
        assert_eq!(dead.raw_position(16_384), None);
    }

    #[test]
    fn test_other_packets() {
        let trigger = NeunetPacket::parse(&[0x5B, 0x01, 0x02, 0x03, 0, 0, 0, 0], ResolutionMode::Bits14);
        assert_eq!(trigger, NeunetPacket::Trigger { id: 0x010203 });

        let time = InstrumentTime::new(504_921_600, 128);
        let packet = NeunetPacket::parse(
            &NeunetPacket::encode_instrument_time(time),
            ResolutionMode::Bits14,
        );
        assert_eq!(packet, NeunetPacket::InstrumentTime { time });

        let unknown = NeunetPacket::parse(&[0x11; 8], ResolutionMode::Bits14);
        assert!(matches!(unknown, NeunetPacket::Unknown { .. }));
        assert!(!unknown.is_neutron());
    }

    #[test]
    fn test_from_slice_truncated() {
        assert!(NeunetPacket::from_slice(&[0x5F, 0, 0], ResolutionMode::Bits14).is_err());
    }

    #[test]
    fn test_resolution_mode_parsing() {
        assert_eq!("14".parse::<ResolutionMode>().unwrap(), ResolutionMode::Bits14);
        assert_eq!("12-bit".parse::<ResolutionMode>().unwrap(), ResolutionMode::Bits12);
        assert!("16".parse::<ResolutionMode>().is_err());
        assert_eq!(ResolutionMode::default().resolution(), 16_384);
        assert_eq!(ResolutionMode::Bits12.resolution(), 4096);
    }

    #[test]
    fn test_display() {
        let event = NeutronEvent {
            time_ticks: 0,
            psd: 7,
            pulse_left: 1,
            pulse_right: 1,
        };
        let text = NeunetPacket::Neutron(event).to_string();
        assert!(text.contains("psd=7"));
        assert!(text.contains("position=0.50000"));
    }
}
