#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::uninlined_format_args
)]
use neunet_core::BinMapper;
use neunet_proto::{
    DetectorConfig, InstrumentTime, NeunetPacket, NeutronEvent, PacketParser, ParserConfig,
    ResolutionMode,
};
use std::io::Write;

// Neutron event whose left/right split puts it at `ratio` along the tube.
fn neutron_at(psd: u8, ratio: f64, mode: ResolutionMode) -> [u8; 8] {
    let full = (1u32 << mode.bits()) - 1;
    let left = (ratio * full as f64).round() as u16;
    let right = full as u16 - left;
    NeutronEvent {
        time_ticks: 0,
        psd,
        pulse_left: left,
        pulse_right: right,
    }
    .encode(mode)
}

#[test]
fn test_capture_decodes_to_expected_bins() {
    let mode = ResolutionMode::Bits14;
    let mut data = vec![0x00, 0x42];
    data.extend_from_slice(&NeunetPacket::encode_instrument_time(InstrumentTime::new(100, 0)));
    for ratio in [0.0, 0.1, 0.3, 0.6, 0.9, 1.0] {
        data.extend_from_slice(&neutron_at(0, ratio, mode));
    }
    data.extend_from_slice(&NeunetPacket::encode_instrument_time(InstrumentTime::new(101, 0)));

    let parser = PacketParser::with_config(ParserConfig::new().with_resolution_mode(mode));
    let parsed = parser.parse_bytes(&data);
    assert_eq!(parsed.skipped, 2);
    assert_eq!(parsed.packets.len(), 8);

    let mapper = BinMapper::new(mode.resolution(), 4).unwrap();
    let bins: Vec<usize> = parsed
        .packets
        .iter()
        .filter_map(NeunetPacket::as_neutron)
        .filter_map(|event| event.raw_position(mode.resolution()))
        .filter_map(|raw| mapper.map(raw))
        .collect();
    assert_eq!(bins, vec![0, 0, 1, 2, 3, 3]);

    let times: Vec<f64> = parsed
        .packets
        .iter()
        .filter_map(|p| match p {
            NeunetPacket::InstrumentTime { time } => Some(time.as_secs_f64()),
            _ => None,
        })
        .collect();
    assert_eq!(times, vec![100.0, 101.0]);
}

#[test]
fn test_twelve_bit_capture() {
    let mode = ResolutionMode::Bits12;
    let mut data = Vec::new();
    for psd in 0..8 {
        data.extend_from_slice(&neutron_at(psd, 0.5, mode));
    }
    let parsed = PacketParser::with_config(
        ParserConfig::new()
            .with_resolution_mode(mode)
            .with_neutrons_only(true),
    )
    .parse_bytes(&data);

    let psds: Vec<u8> = parsed
        .packets
        .iter()
        .filter_map(|p| p.as_neutron().map(|e| e.psd))
        .collect();
    assert_eq!(psds, (0..8).collect::<Vec<_>>());
    for packet in &parsed.packets {
        let ratio = packet.as_neutron().unwrap().position_ratio().unwrap();
        assert!((ratio - 0.5).abs() < 1e-3, "ratio {}", ratio);
    }
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "detector": {{ "readout": {{ "psd_numbers": [2, 5] }}, "network": {{ "timeout_secs": 1.5 }} }} }}"#
    )
    .unwrap();

    let config = DetectorConfig::from_file(file.path()).unwrap();
    assert_eq!(config.psd_numbers, vec![2, 5]);
    assert!((config.timeout_secs - 1.5).abs() < f64::EPSILON);
    assert_eq!(config.resolution_mode, ResolutionMode::Bits14);

    assert!(DetectorConfig::from_file(file.path().with_extension("missing")).is_err());
}
