//! neunet-proto: wire formats of the NEUNET readout board.
//!
//! # Key Components
//!
//! - [`NeunetPacket`] - 8-byte event-stream packets (neutron, trigger,
//!   instrument time)
//! - [`InstrumentTime`] - board clock, seconds since 2008-01-01 UTC
//! - [`RegisterRequest`] / [`RegisterResponse`] - UDP register access and the
//!   staging write sequence
//! - [`PacketParser`] - bulk decoding of captured streams
//! - [`DetectorConfig`] - board address, ports, PSD selection and resolution
//!   mode, loadable from JSON

mod config;
mod error;
pub mod packet;
pub mod parser;
pub mod register;
pub mod time;

pub use config::{
    DetectorConfig, DEFAULT_ADDRESS, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_SECS, DEFAULT_UDP_PORT,
    MAX_PSD,
};
pub use error::{Error, Result};
pub use packet::{
    is_start_byte, NeunetPacket, NeutronEvent, ResolutionMode, INSTRUMENT_TIME, NEUTRON_EVENT,
    PACKET_SIZE, START_BYTES, TRIGGER_ID,
};
pub use parser::{sync_offset, PacketParser, ParsedStream, ParserConfig};
pub use register::{RegisterDump, RegisterRequest, RegisterResponse};
pub use time::InstrumentTime;
