//! Scripted in-memory transport for driving a connection without a network

#![allow(dead_code)]

use bytes::Bytes;
use h2race::http::h2::frames::{Frame, HeadersFrame, SettingsFrame};
use h2race::http::h2::settings::SettingsBuilder;
use h2race::http::h2::{ConnectionError, FrameCodec, FrameDecoder, Result, CONNECTION_PREFACE};
use h2race::http::Transport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// One write the client made
#[derive(Debug, Clone)]
pub struct Written {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

enum Inbound {
    Bytes(Vec<u8>),
    Close,
}

#[derive(Default)]
struct State {
    inbound: VecDeque<Inbound>,
    writes: Vec<Written>,
    closed: bool,
}

/// Transport that replays queued peer bytes and records every write
///
/// Clones share state, so a test keeps one handle while the connection owns
/// another.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Queue bytes for one receive
    pub fn push(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().inbound.push_back(Inbound::Bytes(bytes.into()));
    }

    /// Queue frames for one receive
    pub fn push_frames(&self, frames: &[Frame]) {
        self.push(FrameCodec::encode_all(frames).to_vec());
    }

    /// Make a later receive report a closed connection
    pub fn push_close(&self) {
        self.lock().inbound.push_back(Inbound::Close);
    }

    pub fn writes(&self) -> Vec<Written> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Frames of every write, one entry per write
    pub fn written_frames(&self) -> Vec<Vec<Frame>> {
        self.writes().iter().map(|w| decode_write(&w.bytes)).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(ConnectionError::ConnectionClosed);
        }
        state.writes.push(Written {
            at: Instant::now(),
            bytes: data.to_vec(),
        });
        Ok(())
    }

    fn recv(&mut self, _max_size: usize, timeout: Option<Duration>) -> Result<Bytes> {
        let next = self.lock().inbound.pop_front();
        match next {
            Some(Inbound::Bytes(bytes)) => Ok(Bytes::from(bytes)),
            Some(Inbound::Close) => Err(ConnectionError::ConnectionClosed),
            None => {
                // Nothing scripted: behave like a quiet peer
                thread::sleep(timeout.unwrap_or(Duration::from_millis(10)));
                Ok(Bytes::new())
            }
        }
    }

    fn scheme(&self) -> &'static str {
        "https"
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

/// Decode one write, skipping the connection preface if it leads
pub fn decode_write(bytes: &[u8]) -> Vec<Frame> {
    let bytes = bytes.strip_prefix(CONNECTION_PREFACE).unwrap_or(bytes);
    let mut decoder = FrameDecoder::new();
    decoder.feed(bytes);
    let (frames, errors) = decoder.decode_available();
    assert!(errors.is_empty(), "client wrote undecodable frames: {:?}", errors);
    assert_eq!(decoder.buffered(), 0, "client wrote a partial frame");
    frames
}

pub fn peer_settings() -> Frame {
    let settings = SettingsBuilder::new().max_concurrent_streams(100).build().unwrap();
    Frame::Settings(SettingsFrame::new(settings))
}

pub fn settings_ack() -> Frame {
    Frame::Settings(SettingsFrame::ack())
}

/// Transport with a peer that completes the handshake
pub fn handshaking_peer() -> ScriptedTransport {
    let transport = ScriptedTransport::new();
    transport.push_frames(&[peer_settings()]);
    transport.push_frames(&[settings_ack()]);
    transport
}

/// Response HEADERS for `stream_id`, encoded with `encoder`
pub fn response_headers(
    encoder: &mut hpack::Encoder<'static>,
    stream_id: u32,
    status: &str,
    end_stream: bool,
) -> Frame {
    let block = encoder.encode(vec![(&b":status"[..], status.as_bytes())]);
    Frame::Headers(HeadersFrame::new(stream_id, Bytes::from(block), end_stream, true))
}

/// Decoded header fields of every HEADERS / CONTINUATION block, in order
pub fn decode_request_headers(frames: &[Frame]) -> Vec<Vec<(String, String)>> {
    let mut decoder = hpack::Decoder::new();
    let mut blocks = Vec::new();
    let mut block = Vec::new();
    for frame in frames {
        let end = match frame {
            Frame::Headers(h) => {
                block.extend_from_slice(&h.header_block);
                h.end_headers
            }
            Frame::Continuation(c) => {
                block.extend_from_slice(&c.header_block);
                c.end_headers
            }
            _ => continue,
        };
        if end {
            let fields = decoder.decode(&block).unwrap();
            blocks.push(
                fields
                    .into_iter()
                    .map(|(n, v)| (String::from_utf8(n).unwrap(), String::from_utf8(v).unwrap()))
                    .collect(),
            );
            block.clear();
        }
    }
    blocks
}
