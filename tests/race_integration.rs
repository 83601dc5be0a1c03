//! Race engine integration tests
//!
//! These tests drive a full connection over a scripted transport:
//! - Handshake in both SETTINGS orders, timeout and misuse
//! - Single-packet race with withheld last bytes
//! - Dependency chain followed by a race set
//! - Read loop window, decode error tolerance and early close

mod common;

use bytes::Bytes;
use common::*;
use h2race::http::h2::frames::{DataFrame, Frame, FrameType};
use h2race::http::h2::{
    Connection, ConnectionConfig, ConnectionError, ErrorKind, HandshakeState, RequestSpec,
};
use h2race::race::{RaceConfig, RaceOrchestrator, ReadLoop, ResponseCollector};
use h2race::sink::MemorySink;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .handshake_timeout(Duration::from_secs(2))
        .decode_backoff(Duration::from_millis(5))
        .build()
        .unwrap()
}

fn race_config() -> RaceConfig {
    RaceConfig::builder()
        .read_window(Duration::from_millis(50))
        .build()
        .unwrap()
}

fn established(
    transport: &ScriptedTransport,
    sink: Arc<MemorySink>,
) -> Connection<ScriptedTransport> {
    let mut conn = Connection::new(test_config(), sink);
    conn.setup_with(transport.clone(), "bank.test", 443).unwrap();
    conn
}

fn data_of(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data(d) => Some(d.data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn acks_sent(transport: &ScriptedTransport) -> usize {
    transport
        .written_frames()
        .iter()
        .flatten()
        .filter(|f| f.is_settings_ack())
        .count()
}

#[test]
fn test_handshake_settings_then_ack() {
    let transport = handshaking_peer();
    let mut conn = Connection::new(test_config(), Arc::new(MemorySink::new()));
    conn.setup_with(transport.clone(), "bank.test", 443).unwrap();

    assert_eq!(conn.state(), HandshakeState::Established);
    assert_eq!(conn.remote_settings().max_concurrent_streams, Some(100));
    assert_eq!(acks_sent(&transport), 1);

    // Preface, SETTINGS and WINDOW_UPDATE share the first write
    let writes = transport.writes();
    assert!(writes[0].bytes.starts_with(h2race::http::h2::CONNECTION_PREFACE));
    let opening = decode_write(&writes[0].bytes);
    assert_eq!(opening.len(), 2);
    assert!(opening[0].is_type(FrameType::Settings));
    assert!(!opening[0].is_settings_ack());
    assert!(opening[1].is_type(FrameType::WindowUpdate));
}

#[test]
fn test_handshake_ack_then_settings() {
    let transport = ScriptedTransport::new();
    transport.push_frames(&[settings_ack()]);
    transport.push_frames(&[peer_settings()]);

    let mut conn = Connection::new(test_config(), Arc::new(MemorySink::new()));
    conn.setup_with(transport.clone(), "bank.test", 443).unwrap();

    assert!(conn.is_established());
    assert_eq!(acks_sent(&transport), 1);
}

#[test]
fn test_handshake_ignores_other_frames_and_garbage() {
    let transport = ScriptedTransport::new();
    // SETTINGS payload that is not a multiple of 6
    transport.push(vec![0, 0, 5, 0x4, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5]);
    transport.push_frames(&[Frame::Ping(h2race::http::h2::frames::PingFrame::new([7; 8]))]);
    transport.push_frames(&[peer_settings(), settings_ack()]);

    let sink = Arc::new(MemorySink::new());
    let mut conn = Connection::new(test_config(), sink.clone());
    conn.setup_with(transport.clone(), "bank.test", 443).unwrap();

    assert!(conn.is_established());
    assert_eq!(acks_sent(&transport), 1);
    assert!(sink.contains("ignoring undecodable frame"));
    assert!(sink.contains("ignoring PING"));
}

#[test]
fn test_handshake_timeout() {
    let transport = ScriptedTransport::new();
    transport.push_frames(&[peer_settings()]);

    let config = ConnectionConfig::builder()
        .handshake_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let mut conn = Connection::new(config, Arc::new(MemorySink::new()));

    match conn.setup_with(transport.clone(), "bank.test", 443) {
        Err(ConnectionError::HandshakeTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(100))
        }
        other => panic!("expected handshake timeout, got {:?}", other),
    }
    assert_eq!(conn.state(), HandshakeState::Failed);
    assert!(!conn.is_established());
    assert!(transport.is_closed());

    // A failed connection stays failed; the caller needs a new one
    match conn.setup_with(handshaking_peer(), "bank.test", 443) {
        Err(e @ ConnectionError::SetupFailed { .. }) => assert_eq!(e.kind(), ErrorKind::Usage),
        other => panic!("expected setup failure, got {:?}", other),
    }
    assert!(matches!(conn.send_frames(&[]), Err(ConnectionError::NotEstablished)));
}

#[test]
fn test_setup_twice_rejected() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));

    match conn.setup_with(handshaking_peer(), "other.test", 443) {
        Err(ConnectionError::AlreadySetup { host, port }) => {
            assert_eq!(host, "bank.test");
            assert_eq!(port, 443);
        }
        other => panic!("expected AlreadySetup, got {:?}", other),
    }
}

#[test]
fn test_operations_before_setup_rejected() {
    let mut conn: Connection<ScriptedTransport> =
        Connection::new(test_config(), Arc::new(MemorySink::new()));
    assert!(matches!(conn.next_stream_ids(1), Err(ConnectionError::NotEstablished)));
    assert!(matches!(conn.send_frames(&[settings_ack()]), Err(ConnectionError::NotEstablished)));

    let specs = vec![RequestSpec::new("GET", "/")];
    let result = RaceOrchestrator::new(&mut conn, race_config()).race(&specs);
    assert!(matches!(result, Err(ConnectionError::NotEstablished)));

    let mut collector = ResponseCollector::new();
    let drained = ReadLoop::new(&mut conn).drain(Duration::ZERO, &mut collector);
    assert!(matches!(drained, Err(ConnectionError::NotEstablished)));
}

#[test]
fn test_race_withholds_last_byte() {
    let transport = handshaking_peer();
    let sink = Arc::new(MemorySink::new());
    let mut conn = established(&transport, sink.clone());
    let before = transport.write_count();

    let specs: Vec<RequestSpec> = ["GETx", "GETy", "GETz"]
        .iter()
        .map(|body| {
            RequestSpec::builder("POST", "/redeem")
                .body(Bytes::from_static(body.as_bytes()))
                .build()
        })
        .collect();
    let report = RaceOrchestrator::new(&mut conn, race_config()).race(&specs).unwrap();
    assert_eq!(report.stream_ids, vec![1, 3, 5]);
    assert_eq!(report.settle_delay, Duration::from_millis(100));

    let writes = transport.writes();
    let race_writes = &writes[before..];
    // One write per withheld request, then the release
    assert_eq!(race_writes.len(), 4);

    for (k, write) in race_writes[..3].iter().enumerate() {
        let frames = decode_write(&write.bytes);
        assert!(frames[0].is_type(FrameType::Headers));
        assert!(frames.iter().all(|f| !f.is_end_stream()));
        assert!(frames.iter().all(|f| f.stream_id() == report.stream_ids[k]));
        assert_eq!(data_of(&frames), b"GET");
    }

    let release = decode_write(&race_writes[3].bytes);
    assert_eq!(release.len(), 3);
    for (frame, (id, byte)) in release.iter().zip([(1, b"x"), (3, b"y"), (5, b"z")]) {
        assert!(frame.is_type(FrameType::Data));
        assert!(frame.is_end_stream());
        assert_eq!(frame.stream_id(), id);
        assert_eq!(data_of(std::slice::from_ref(frame)), byte.to_vec());
    }

    let settle = race_writes[3].at.duration_since(race_writes[2].at);
    assert!(settle >= Duration::from_millis(100), "released after {:?}", settle);
    assert!(sink.contains("released 3 frames"));
}

#[test]
fn test_race_request_headers() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));
    let before = transport.write_count();

    let spec = RequestSpec::builder("POST", "/transfer")
        .header("X-Csrf", "t0k3n")
        .body("amount=10")
        .build();
    RaceOrchestrator::new(&mut conn, race_config())
        .race(&[spec.clone(), spec])
        .unwrap();

    let frames: Vec<Frame> = transport.written_frames()[before..]
        .iter()
        .flatten()
        .cloned()
        .collect();
    let blocks = decode_request_headers(&frames);
    assert_eq!(blocks.len(), 2);
    for block in blocks {
        assert_eq!(
            block,
            vec![
                (":method".to_string(), "POST".to_string()),
                (":path".to_string(), "/transfer".to_string()),
                (":scheme".to_string(), "https".to_string()),
                (":authority".to_string(), "bank.test".to_string()),
                ("x-csrf".to_string(), "t0k3n".to_string()),
            ]
        );
    }
}

#[test]
fn test_race_empty_bodies() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));
    let before = transport.write_count();

    let specs = vec![RequestSpec::new("GET", "/balance"); 2];
    RaceOrchestrator::new(&mut conn, race_config()).race(&specs).unwrap();

    let writes = transport.written_frames();
    for withheld in &writes[before..before + 2] {
        assert_eq!(withheld.len(), 1);
        assert!(withheld[0].is_type(FrameType::Headers));
        assert!(!withheld[0].is_end_stream());
    }
    let release = &writes[before + 2];
    assert_eq!(release.len(), 2);
    assert!(release.iter().all(|f| f.is_end_stream() && f.body_len() == 0));
}

#[test]
fn test_race_without_flows_sends_nothing() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));
    let before = transport.write_count();

    let report = RaceOrchestrator::new(&mut conn, race_config()).race(&[]).unwrap();
    assert!(report.stream_ids.is_empty());
    assert_eq!(transport.write_count(), before);
}

#[test]
fn test_dependent_race_chain_of_ten() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));
    let before = transport.write_count();

    let specs = vec![
        RequestSpec::builder("POST", "/withdraw").body("1").build(),
        RequestSpec::builder("POST", "/withdraw").body("2").build(),
    ];
    let report = RaceOrchestrator::new(&mut conn, race_config())
        .dependent_race(&specs)
        .unwrap();

    let chain = report.chain.clone().unwrap();
    let chain_ids: Vec<u32> = (0..10).map(|k| 1 + 2 * k).collect();
    assert_eq!(chain.ids(), chain_ids.as_slice());
    assert_eq!(report.stream_ids, vec![21, 23]);

    let writes = transport.written_frames();
    let writes = &writes[before..];
    // Ten chain requests, two withheld requests, one release
    assert_eq!(writes.len(), 13);

    for (k, frames) in writes[..10].iter().enumerate() {
        let headers = match &frames[0] {
            Frame::Headers(h) => h,
            other => panic!("expected HEADERS, got {}", other),
        };
        assert_eq!(headers.stream_id, chain_ids[k]);
        // POST /long with no body ends on HEADERS
        assert!(headers.end_stream);
        match k {
            0 => assert_eq!(headers.priority, None),
            _ => {
                let priority = headers.priority.unwrap();
                assert_eq!(priority.stream_dependency, chain_ids[k - 1]);
                assert_eq!(priority.weight, 0);
                assert!(!priority.exclusive);
            }
        }
    }

    for frames in &writes[10..12] {
        let priority = match &frames[0] {
            Frame::Headers(h) => h.priority.unwrap(),
            other => panic!("expected HEADERS, got {}", other),
        };
        assert_eq!(priority.stream_dependency, 19);
        assert!(frames.iter().all(|f| !f.is_end_stream()));
    }

    let release = &writes[12];
    assert_eq!(release.iter().map(Frame::stream_id).collect::<Vec<_>>(), vec![21, 23]);
    assert_eq!(data_of(release), b"12");
}

#[test]
fn test_drain_zero_returns_immediately() {
    let transport = handshaking_peer();
    transport.push_frames(&[peer_settings()]);
    let mut conn = established(&transport, Arc::new(MemorySink::new()));
    let before = transport.write_count();

    let start = Instant::now();
    let mut collector = ResponseCollector::new();
    let summary = ReadLoop::new(&mut conn).drain(Duration::ZERO, &mut collector).unwrap();

    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(summary.frames, 0);
    // The queued SETTINGS was never read, so no ACK went out
    assert_eq!(transport.write_count(), before);
}

#[test]
fn test_drain_window_is_fixed() {
    let transport = handshaking_peer();
    let mut conn = established(&transport, Arc::new(MemorySink::new()));

    let start = Instant::now();
    let mut collector = ResponseCollector::new();
    let summary = ReadLoop::new(&mut conn)
        .drain(Duration::from_millis(120), &mut collector)
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(120));
    assert_eq!(summary.frames, 0);
    assert!(!summary.closed_early);
}

#[test]
fn test_race_collects_responses() {
    let transport = handshaking_peer();
    let mut hpack = hpack::Encoder::new();
    transport.push_frames(&[
        response_headers(&mut hpack, 1, "200", false),
        Frame::Data(DataFrame::new(1, Bytes::from_static(b"ok"), true)),
    ]);
    // Garbled bytes in the middle of the responses
    transport.push(vec![0, 0, 5, 0x4, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5]);
    transport.push_frames(&[response_headers(&mut hpack, 3, "409", true)]);

    let sink = Arc::new(MemorySink::new());
    let mut conn = established(&transport, sink.clone());
    let specs = vec![RequestSpec::builder("POST", "/redeem").body("c").build(); 2];
    let report = RaceOrchestrator::new(&mut conn, race_config()).race(&specs).unwrap();

    assert_eq!(report.statuses(), vec![(1, Some(200)), (3, Some(409))]);
    assert_eq!(report.response(1).unwrap().body_len, 2);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.decode_errors, 1);
    assert!(sink.contains("received HEADERS stream=1"));
}

#[test]
fn test_drain_stops_when_peer_closes() {
    let transport = handshaking_peer();
    transport.push_close();
    let sink = Arc::new(MemorySink::new());
    let mut conn = established(&transport, sink.clone());

    let start = Instant::now();
    let mut collector = ResponseCollector::new();
    let summary = ReadLoop::new(&mut conn)
        .drain(Duration::from_secs(5), &mut collector)
        .unwrap();

    assert!(summary.closed_early);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(sink.contains("peer closed the connection"));
}

#[test]
fn test_peer_settings_acked_while_draining() {
    let transport = handshaking_peer();
    transport.push_frames(&[peer_settings()]);
    let mut conn = established(&transport, Arc::new(MemorySink::new()));

    let mut collector = ResponseCollector::new();
    ReadLoop::new(&mut conn)
        .drain(Duration::from_millis(30), &mut collector)
        .unwrap();

    assert_eq!(acks_sent(&transport), 2);
}
