//! HTTP/2 over TLS integration tests
//!
//! These tests run a loopback OpenSSL peer on a thread and verify:
//! - ALPN negotiation for "h2" and the distinguishable failure without it
//! - Connection preface and settings exchange over TLS
//! - A full race: withheld requests, one release, responses observed

mod common;

use common::response_headers;
use h2race::http::h2::frames::{Frame, SettingsFrame};
use h2race::http::h2::{
    Connection, ConnectionConfig, ConnectionError, FrameCodec, FrameDecoder, RequestSpec, Settings,
    CONNECTION_PREFACE,
};
use h2race::http::tls::{TlsConfig, TlsConnector, TlsTransport};
use h2race::http::Transport;
use h2race::race::{RaceConfig, RaceOrchestrator};
use h2race::sink::MemorySink;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn server_config(alpn: &[&str]) -> TlsConfig {
    TlsConfig::server().alpn(alpn).self_signed("localhost").build().unwrap()
}

fn insecure_connector() -> TlsConnector {
    let config = TlsConfig::client().verify_peer(false).build().unwrap();
    TlsConnector::with_config(config)
}

/// Read the preface and answer with SETTINGS and an ACK
fn accept_h2(listener: &TcpListener, config: &TlsConfig) -> (TlsTransport, FrameDecoder) {
    let (tcp, _) = listener.accept().unwrap();
    let mut tls = config.accept(tcp).unwrap();

    let mut buf = Vec::new();
    while buf.len() < CONNECTION_PREFACE.len() {
        buf.extend_from_slice(&tls.recv(65535, WAIT).unwrap());
    }
    assert!(buf.starts_with(CONNECTION_PREFACE));

    let mut decoder = FrameDecoder::new();
    decoder.feed(&buf[CONNECTION_PREFACE.len()..]);
    let opening = [
        Frame::Settings(SettingsFrame::new(Settings::new())),
        Frame::Settings(SettingsFrame::ack()),
    ];
    tls.send(&FrameCodec::encode_all(&opening)).unwrap();
    (tls, decoder)
}

/// Peer that answers every stream once all `streams` have ended
fn spawn_race_peer(streams: usize) -> (u16, JoinHandle<Vec<u32>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut tls, mut decoder) = accept_h2(&listener, &server_config(&["h2"]));

        let mut ended = Vec::new();
        loop {
            while let Some(frame) = decoder.next_frame().unwrap() {
                if frame.is_end_stream() {
                    ended.push(frame.stream_id());
                }
            }
            if ended.len() >= streams {
                break;
            }
            decoder.feed(&tls.recv(65535, WAIT).unwrap());
        }

        let mut hpack = hpack::Encoder::new();
        let responses: Vec<Frame> = ended
            .iter()
            .map(|id| response_headers(&mut hpack, *id, "200", true))
            .collect();
        tls.send(&FrameCodec::encode_all(&responses)).unwrap();

        thread::sleep(Duration::from_millis(100));
        tls.close().unwrap();
        ended
    });

    (port, handle)
}

#[test]
fn test_h2_tls_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut tls, _) = accept_h2(&listener, &server_config(&["h2"]));
        assert_eq!(tls.info().alpn.as_deref(), Some("h2"));
        thread::sleep(Duration::from_millis(200));
        let _ = tls.close();
    });

    let sink = Arc::new(MemorySink::new());
    let mut conn = Connection::new(ConnectionConfig::default(), sink.clone());
    conn.setup(&insecure_connector(), "127.0.0.1", port).unwrap();

    assert!(conn.is_established());
    assert_eq!(conn.scheme(), "https");
    assert_eq!(conn.authority().unwrap(), format!("127.0.0.1:{}", port));
    assert!(sink.contains("connection established with 127.0.0.1"));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_alpn_mismatch_is_distinguishable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        // The handshake itself succeeds; the client rejects the result
        let _ = server_config(&["http/1.1"]).accept(tcp);
    });

    let mut conn = Connection::new(ConnectionConfig::default(), Arc::new(MemorySink::new()));
    match conn.setup(&insecure_connector(), "127.0.0.1", port) {
        Err(ConnectionError::AlpnNegotiationFailed(selected)) => assert_eq!(selected, None),
        other => panic!("expected ALPN failure, got {:?}", other.err()),
    }
    assert!(!conn.is_established());
    server.join().unwrap();
}

#[test]
fn test_race_over_tls() {
    let (port, server) = spawn_race_peer(2);

    let sink = Arc::new(MemorySink::new());
    let mut conn = Connection::new(ConnectionConfig::default(), sink.clone());
    conn.setup(&insecure_connector(), "127.0.0.1", port).unwrap();

    let specs = vec![RequestSpec::builder("POST", "/redeem").body("code=A").build(); 2];
    let config = RaceConfig::builder()
        .settle_delay(Duration::from_millis(20))
        .read_window(Duration::from_secs(3))
        .build()
        .unwrap();
    let report = RaceOrchestrator::new(&mut conn, config).race(&specs).unwrap();

    assert_eq!(server.join().unwrap(), vec![1, 3]);
    assert_eq!(report.statuses(), vec![(1, Some(200)), (3, Some(200))]);
    assert!(report.closed_early);
    assert!(sink.contains("released 2 frames"));
}
