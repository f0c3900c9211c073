//! Detector configuration for a NEUNET board.

use crate::packet::ResolutionMode;
use crate::{Error, Result};
use neunet_core::DetectorGeometry;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Factory address of the board.
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 17));
/// TCP port of the event stream.
pub const DEFAULT_TCP_PORT: u16 = 23;
/// UDP port of the register interface.
pub const DEFAULT_UDP_PORT: u16 = 4660;
/// Socket timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;
/// Highest PSD number on one board.
pub const MAX_PSD: u8 = 7;

/// Connection and readout settings for one board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Board IP address.
    pub address: IpAddr,
    /// Event stream port.
    pub tcp_port: u16,
    /// Register port.
    pub udp_port: u16,
    /// PSD tubes to histogram, 0-7.
    pub psd_numbers: Vec<u8>,
    /// Pulse-height layout.
    pub resolution_mode: ResolutionMode,
    /// Socket read/write timeout in seconds.
    pub timeout_secs: f64,
    /// Sensitive length of each tube in millimetres.
    pub sensitive_length_mm: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            psd_numbers: vec![0, 7],
            resolution_mode: ResolutionMode::Bits14,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            sensitive_length_mm: DetectorGeometry::default().sensitive_length_mm,
        }
    }
}

// File schema; every section and field may be omitted.
#[derive(Deserialize)]
struct JsonConfig {
    detector: JsonDetector,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonDetector {
    network: JsonNetwork,
    readout: JsonReadout,
    geometry: JsonGeometry,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonNetwork {
    address: IpAddr,
    tcp_port: u16,
    udp_port: u16,
    timeout_secs: f64,
}

impl Default for JsonNetwork {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonReadout {
    psd_numbers: Vec<u8>,
    resolution_bits: u8,
}

impl Default for JsonReadout {
    fn default() -> Self {
        Self {
            psd_numbers: vec![0, 7],
            resolution_bits: ResolutionMode::default().bits(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonGeometry {
    sensitive_length_mm: f64,
}

impl Default for JsonGeometry {
    fn default() -> Self {
        Self {
            sensitive_length_mm: DetectorGeometry::default().sensitive_length_mm,
        }
    }
}

impl DetectorConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the JSON is malformed or
    /// the values fail [`Self::validate`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Loads configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the values fail
    /// [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let detector = config.detector;
        let config = Self {
            address: detector.network.address,
            tcp_port: detector.network.tcp_port,
            udp_port: detector.network.udp_port,
            psd_numbers: detector.readout.psd_numbers,
            resolution_mode: ResolutionMode::try_from(detector.readout.resolution_bits)?,
            timeout_secs: detector.network.timeout_secs,
            sensitive_length_mm: detector.geometry.sensitive_length_mm,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the board address.
    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Sets the PSD tubes to histogram.
    #[must_use]
    pub fn with_psd_numbers(mut self, psd_numbers: Vec<u8>) -> Self {
        self.psd_numbers = psd_numbers;
        self
    }

    /// Sets the resolution mode.
    #[must_use]
    pub fn with_resolution_mode(mut self, mode: ResolutionMode) -> Self {
        self.resolution_mode = mode;
        self
    }

    /// Sets the socket timeout in seconds.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Checks PSD numbers, timeout and tube length.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.psd_numbers.is_empty() {
            return Err(Error::InvalidConfig("no PSD numbers given".to_string()));
        }
        if let Some(psd) = self.psd_numbers.iter().find(|&&psd| psd > MAX_PSD) {
            return Err(Error::InvalidConfig(format!(
                "PSD number {psd} is outside 0-{MAX_PSD}"
            )));
        }
        let mut sorted = self.psd_numbers.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.psd_numbers.len() {
            return Err(Error::InvalidConfig(format!(
                "duplicate PSD numbers in {:?}",
                self.psd_numbers
            )));
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "timeout must be positive, got {}",
                self.timeout_secs
            )));
        }
        if !(self.sensitive_length_mm.is_finite() && self.sensitive_length_mm > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sensitive length must be positive, got {}",
                self.sensitive_length_mm
            )));
        }
        Ok(())
    }

    /// Event stream endpoint.
    #[must_use]
    pub fn tcp_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.tcp_port)
    }

    /// Register endpoint.
    #[must_use]
    pub fn udp_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.udp_port)
    }

    /// Socket timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Native position resolution R of decoded events.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution_mode.resolution()
    }

    /// Tube geometry for millimetre positions.
    #[must_use]
    pub fn geometry(&self) -> DetectorGeometry {
        DetectorGeometry::new(self.sensitive_length_mm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.tcp_endpoint().to_string(), "192.168.0.17:23");
        assert_eq!(config.udp_endpoint().to_string(), "192.168.0.17:4660");
        assert_eq!(config.psd_numbers, vec![0, 7]);
        assert_eq!(config.resolution(), 16_384);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_loading() {
        let json = r#"{
            "detector": {
                "network": {
                    "address": "10.0.0.5",
                    "tcp_port": 2300,
                    "udp_port": 4661,
                    "timeout_secs": 2.5
                },
                "readout": {
                    "psd_numbers": [1, 2, 3],
                    "resolution_bits": 12
                },
                "geometry": {
                    "sensitive_length_mm": 600.0
                }
            }
        }"#;

        let config = DetectorConfig::from_json(json).expect("Failed to parse JSON");

        assert_eq!(config.tcp_endpoint().to_string(), "10.0.0.5:2300");
        assert_eq!(config.udp_port, 4661);
        assert_eq!(config.psd_numbers, vec![1, 2, 3]);
        assert_eq!(config.resolution_mode, ResolutionMode::Bits12);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert!((config.geometry().sensitive_length_mm - 600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_partial_config_address_only() {
        let json = r#"{ "detector": { "network": { "address": "192.168.1.40" } } }"#;

        let config = DetectorConfig::from_json(json).expect("Should parse partial config");

        assert_eq!(config.address.to_string(), "192.168.1.40");
        assert_eq!(config.tcp_port, DEFAULT_TCP_PORT);
        assert_eq!(config.psd_numbers, vec![0, 7]);
        assert_eq!(config.resolution_mode, ResolutionMode::Bits14);
    }

    #[test]
    fn test_json_empty_detector() {
        let config = DetectorConfig::from_json(r#"{ "detector": {} }"#).unwrap();
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_psd = r#"{ "detector": { "readout": { "psd_numbers": [0, 8] } } }"#;
        let err = DetectorConfig::from_json(bad_psd).unwrap_err().to_string();
        assert!(err.contains("PSD number 8"), "{err}");

        let bad_bits = r#"{ "detector": { "readout": { "resolution_bits": 16 } } }"#;
        assert!(matches!(
            DetectorConfig::from_json(bad_bits),
            Err(Error::UnsupportedResolution(16))
        ));

        assert!(DetectorConfig::default()
            .with_psd_numbers(vec![3, 3])
            .validate()
            .is_err());
        assert!(DetectorConfig::default()
            .with_timeout_secs(0.0)
            .validate()
            .is_err());
    }
}
