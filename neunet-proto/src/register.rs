//! UDP register access messages.
//!
//! A request is an 8-byte header `[0xFF, mode, id, len, addr(u32 BE)]`
//! followed by the data on writes. The board answers with an 8-byte header
//! and the register contents; bit 0 of the low nibble of header byte 1 flags
//! a bus error.

use crate::time::InstrumentTime;
use crate::{Error, Result};
use std::fmt;
use std::fmt::Write as _;

/// Length of request and response headers.
pub const HEADER_LEN: usize = 8;
/// First byte of every request.
pub const REQUEST_MARKER: u8 = 0xFF;
/// Mode byte of a read request.
pub const READ_MODE: u8 = 0xC0;
/// Mode byte of a write request.
pub const WRITE_MODE: u8 = 0x80;

/// Time counter mode (`0x80` selects 32-bit seconds).
pub const TIME_MODE: u32 = 0x18A;
/// Device time, five instrument-time bytes plus two zero bytes.
pub const DEVICE_TIME: u32 = 0x190;
/// Event memory read/write mode.
pub const READ_WRITE: u32 = 0x186;
/// Resolution and transfer mode.
pub const RESOLUTION: u32 = 0x1B4;
/// Handshake / one-way transfer switch.
pub const HANDSHAKE: u32 = 0x1B5;

/// Blocks read by a full register dump, as (address, length).
pub const REGISTER_DUMP: [(u32, u8); 6] = [
    (0x180, 8),
    (0x188, 3),
    (0x18B, 5),
    (0x190, 7),
    (0x198, 8),
    (0x1B0, 6),
];

/// Read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Read `len` bytes.
    Read {
        /// Bytes to read.
        len: u8,
    },
    /// Write these bytes.
    Write(Vec<u8>),
}

/// One register request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Request id echoed by the board.
    pub id: u8,
    /// Register address.
    pub address: u32,
    /// Operation.
    pub access: Access,
}

impl RegisterRequest {
    /// Reads `len` bytes from `address`.
    #[must_use]
    pub fn read(address: u32, len: u8) -> Self {
        Self {
            id: 0,
            address,
            access: Access::Read { len },
        }
    }

    /// Writes `data` to `address`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `data` is empty or longer than
    /// 255 bytes.
    pub fn write(address: u32, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() || data.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidRequest(format!(
                "write to {address:#x} carries {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            id: 0,
            address,
            access: Access::Write(data),
        })
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_id(mut self, id: u8) -> Self {
        self.id = id;
        self
    }

    /// Returns true for writes.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self.access, Access::Write(_))
    }

    /// Encodes the datagram.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let (mode, len, data): (u8, u8, &[u8]) = match &self.access {
            Access::Read { len } => (READ_MODE, *len, &[]),
            // Length checked in `write`.
            Access::Write(data) => (WRITE_MODE, data.len() as u8, data),
        };
        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&[REQUEST_MARKER, mode, self.id, len]);
        bytes.extend_from_slice(&self.address.to_be_bytes());
        bytes.extend_from_slice(data);
        bytes
    }
}

/// A decoded register response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Response header.
    pub header: [u8; HEADER_LEN],
    /// Register contents following the header.
    pub data: Vec<u8>,
}

impl RegisterResponse {
    /// Decodes a response datagram.
    ///
    /// # Errors
    /// [`Error::Truncated`] if shorter than the header; [`Error::BusError`]
    /// if the board flagged a bus error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: [u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|head| head.try_into().ok())
            .ok_or(Error::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            })?;
        if (header[1] & 0x0F) & 0x01 != 0 {
            return Err(Error::BusError(header));
        }
        Ok(Self {
            header,
            data: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Request id echoed by the board.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.header[2]
    }

    /// Register address echoed by the board.
    #[must_use]
    pub fn address(&self) -> u32 {
        u32::from_be_bytes([self.header[4], self.header[5], self.header[6], self.header[7]])
    }
}

/// Writes that prepare the board for a run: 32-bit time mode, device time
/// set to `now`, event memory read mode, then 14-bit one-way transfer.
///
/// # Errors
/// Never fails for the fixed payloads; the `Result` comes from request
/// construction.
pub fn staging_sequence(now: InstrumentTime) -> Result<Vec<RegisterRequest>> {
    let mut device_time = now.to_bytes().to_vec();
    device_time.extend_from_slice(&[0x00, 0x00]);
    Ok(vec![
        RegisterRequest::write(TIME_MODE, [0x80])?,
        RegisterRequest::write(DEVICE_TIME, device_time)?,
        RegisterRequest::write(READ_WRITE, [0x00, 0x00])?,
        RegisterRequest::write(RESOLUTION, [0x8A, 0x80])?,
    ])
}

/// Writes that return the board to handshake mode.
///
/// # Errors
/// See [`staging_sequence`].
pub fn unstage_sequence() -> Result<Vec<RegisterRequest>> {
    Ok(vec![RegisterRequest::write(HANDSHAKE, [0x00])?])
}

/// Reads covering the whole writable register block.
#[must_use]
pub fn dump_requests() -> Vec<RegisterRequest> {
    REGISTER_DUMP
        .iter()
        .map(|&(address, len)| RegisterRequest::read(address, len))
        .collect()
}

/// Contents of the register block, one row per dump request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterDump {
    /// (address, bytes) rows in read order.
    pub rows: Vec<(u32, Vec<u8>)>,
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<String> = (0..8).map(|i| format!("+{i}")).collect();
        writeln!(f, "        {}", columns.join("|"))?;
        for (address, bytes) in &self.rows {
            let mut hex = String::with_capacity(bytes.len() * 3);
            for (i, byte) in bytes.iter().enumerate() {
                if i > 0 {
                    hex.push(':');
                }
                let _ = write!(hex, "{byte:02x}");
            }
            writeln!(f, "{address:#x} = {hex}")?;
        }
        Ok(())
    }
}
