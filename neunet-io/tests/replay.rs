#![allow(clippy::uninlined_format_args)]
use neunet_core::{
    acquire_array, CancelToken, CompletionReason, DetectorGeometry, HistogramConfig, RunStatus,
};
use neunet_io::{
    read_histogram_text, rebinned_path, save_array, write_position_histogram, CaptureFile,
    NeunetClient, SaveOptions, StreamConfig,
};
use neunet_proto::{DetectorConfig, InstrumentTime, NeunetPacket, NeutronEvent, ResolutionMode};
use std::io::Write;
use std::net::TcpListener;
use std::thread;

fn neutron(psd: u8, left: u16, right: u16) -> [u8; 8] {
    NeutronEvent {
        time_ticks: 0,
        psd,
        pulse_left: left,
        pulse_right: right,
    }
    .encode(ResolutionMode::Bits14)
}

fn time(seconds: u32) -> [u8; 8] {
    NeunetPacket::encode_instrument_time(InstrumentTime::new(seconds, 0))
}

// Two seconds of data on PSDs 0 and 7 plus one event on PSD 5, then a
// third second that falls outside a 2 s exposure.
fn stream_bytes() -> Vec<u8> {
    let mut data = vec![0xAA];
    for packet in [
        time(1000),
        neutron(0, 1, 3),
        neutron(7, 1, 1),
        neutron(5, 1, 1),
        time(1001),
        neutron(0, 0, 1),
        neutron(0, 1, 0),
        time(1002),
        neutron(0, 1, 1),
        neutron(7, 1, 1),
    ] {
        data.extend_from_slice(&packet);
    }
    data
}

#[test]
fn test_capture_replay_to_saved_histograms() {
    let dir = tempfile::tempdir().unwrap();
    let capture_path = dir.path().join("run.bin");
    std::fs::write(&capture_path, stream_bytes()).unwrap();

    let capture = CaptureFile::open(&capture_path).unwrap();
    let mut source = capture.stream(StreamConfig::new());
    let result = acquire_array(
        &mut source,
        HistogramConfig::new(2.0, 4),
        &[0, 7],
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(
        result.status,
        RunStatus::Completed(CompletionReason::WindowElapsed)
    );
    assert!((result.elapsed_time - 2.0).abs() < f64::EPSILON);
    assert_eq!(result.detector(0).unwrap().histogram, vec![1, 1, 0, 1]);
    assert_eq!(result.detector(7).unwrap().histogram, vec![0, 0, 1, 0]);
    assert_eq!(result.unrouted, 1);
    assert_eq!(source.statistics().skipped_bytes, 1);

    let options = SaveOptions::new()
        .with_fldr(dir.path())
        .with_test_label("replay");
    let paths = save_array(&options, &result, &DetectorGeometry::default()).unwrap();
    assert_eq!(paths.len(), 2);

    let saved = read_histogram_text(&paths[0]).unwrap();
    assert_eq!(saved.counts, vec![1.0, 1.0, 0.0, 1.0]);
    assert_eq!(saved.positions, vec![43.75, 131.25, 218.75, 306.25]);

    let rebinned = saved.rebin(2).unwrap();
    assert_eq!(rebinned.counts, vec![2.0, 1.0]);
    let out = rebinned_path(&paths[0], 2);
    write_position_histogram(&out, &rebinned, &[]).unwrap();
    assert_eq!(read_histogram_text(&out).unwrap(), rebinned);
}

#[test]
fn test_live_stream_from_fake_board() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(&stream_bytes()).unwrap();
    });

    let mut config = DetectorConfig::default()
        .with_address([127, 0, 0, 1].into())
        .with_timeout_secs(2.0);
    config.tcp_port = port;
    let client = NeunetClient::connect(config).unwrap();
    let mut source = client.open_stream().unwrap();

    let result = acquire_array(
        &mut source,
        HistogramConfig::new(2.0, 4),
        &client.config().psd_numbers,
        &CancelToken::new(),
    )
    .unwrap();
    server.join().unwrap();

    assert!(result.is_complete());
    assert_eq!(result.detector(0).unwrap().total_counts(), 3);
    assert_eq!(result.detector(7).unwrap().total_counts(), 1);
    assert_eq!(result.unrouted, 0);
    assert_eq!(source.statistics().filtered, 1);
}

#[test]
fn test_inspect_reads_packets_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(&stream_bytes()).unwrap();
    });

    let mut config = DetectorConfig::default().with_address([127, 0, 0, 1].into());
    config.tcp_port = port;
    let client = NeunetClient::connect(config).unwrap();
    let packets = client.inspect(3).unwrap();
    server.join().unwrap();

    assert_eq!(packets.len(), 3);
    assert!(matches!(packets[0], NeunetPacket::InstrumentTime { .. }));
    assert_eq!(packets[1].as_neutron().unwrap().psd, 0);
    assert_eq!(packets[2].as_neutron().unwrap().psd, 7);
}
