//! Time-bounded observation of the peer after a race
//!
//! [`ReadLoop::drain`] receives for a fixed window and hands every decoded
//! frame to a [`FrameObserver`]. The window does not shrink or grow with
//! traffic: a quiet peer is still watched until the window ends. Garbled
//! input is expected while a race is in flight, so decode errors are logged
//! and skipped.

use crate::http::h2::error::{ConnectionError, DecodeError, Result};
use crate::http::h2::frames::{Frame, GoawayFrame};
use crate::http::h2::stream::StreamId;
use crate::http::h2::Connection;
use crate::http::session::Transport;
use crate::sink::EventSink;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TARGET: &str = "h2race::read_loop";

/// Receives every frame the read loop decodes
pub trait FrameObserver {
    fn observe(&mut self, frame: &Frame);

    fn on_decode_error(&mut self, _error: &DecodeError) {}
}

impl<F: FrameObserver + ?Sized> FrameObserver for &mut F {
    fn observe(&mut self, frame: &Frame) {
        (**self).observe(frame)
    }

    fn on_decode_error(&mut self, error: &DecodeError) {
        (**self).on_decode_error(error)
    }
}

impl<A: FrameObserver, B: FrameObserver> FrameObserver for (A, B) {
    fn observe(&mut self, frame: &Frame) {
        self.0.observe(frame);
        self.1.observe(frame);
    }

    fn on_decode_error(&mut self, error: &DecodeError) {
        self.0.on_decode_error(error);
        self.1.on_decode_error(error);
    }
}

/// One log record per received frame
pub struct LogObserver {
    sink: Arc<dyn EventSink>,
}

impl LogObserver {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        LogObserver { sink }
    }
}

impl FrameObserver for LogObserver {
    fn observe(&mut self, frame: &Frame) {
        match frame {
            Frame::RstStream(_) | Frame::Goaway(_) => {
                self.sink.warn(TARGET, format_args!("received {}", frame))
            }
            _ => self.sink.info(TARGET, format_args!("received {}", frame)),
        }
    }

    fn on_decode_error(&mut self, error: &DecodeError) {
        self.sink.debug(TARGET, format_args!("skipped undecodable frame: {}", error));
    }
}

/// What the peer sent back on one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamResponse {
    /// `:status` of the first header block
    pub status: Option<u16>,
    /// Regular header fields of every header block, trailers included
    pub headers: Vec<(String, String)>,
    pub body_len: usize,
    /// RST_STREAM error code
    pub reset: Option<u32>,
    /// The peer closed its side of the stream
    pub ended: bool,
}

impl StreamResponse {
    /// Ended or reset
    pub fn is_complete(&self) -> bool {
        self.ended || self.reset.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct PendingBlock {
    stream_id: StreamId,
    block: Vec<u8>,
    end_stream: bool,
}

/// Decodes responses per stream
///
/// Header blocks are reassembled across CONTINUATION frames and decoded with
/// the connection's response HPACK context, so every header block from the
/// peer must pass through the same collector.
pub struct ResponseCollector {
    hpack: hpack::Decoder<'static>,
    pending: Option<PendingBlock>,
    responses: BTreeMap<StreamId, StreamResponse>,
    goaway: Option<GoawayFrame>,
    hpack_errors: usize,
}

impl ResponseCollector {
    pub fn new() -> Self {
        ResponseCollector {
            hpack: hpack::Decoder::new(),
            pending: None,
            responses: BTreeMap::new(),
            goaway: None,
            hpack_errors: 0,
        }
    }

    pub fn responses(&self) -> &BTreeMap<StreamId, StreamResponse> {
        &self.responses
    }

    pub fn response(&self, stream_id: StreamId) -> Option<&StreamResponse> {
        self.responses.get(&stream_id)
    }

    pub fn into_responses(self) -> BTreeMap<StreamId, StreamResponse> {
        self.responses
    }

    /// Last GOAWAY received, if any
    pub fn goaway(&self) -> Option<&GoawayFrame> {
        self.goaway.as_ref()
    }

    /// Header blocks that failed to decode
    pub fn hpack_errors(&self) -> usize {
        self.hpack_errors
    }

    fn finish_block(&mut self, pending: PendingBlock) {
        let fields = match self.hpack.decode(&pending.block) {
            Ok(fields) => fields,
            Err(_) => {
                // The decoder context is unusable after this; later blocks fail too
                self.hpack_errors += 1;
                return;
            }
        };

        let response = self.responses.entry(pending.stream_id).or_default();
        for (name, value) in fields {
            let name = String::from_utf8_lossy(&name).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();
            if name == ":status" {
                if response.status.is_none() {
                    response.status = value.parse().ok();
                }
            } else if !name.starts_with(':') {
                response.headers.push((name, value));
            }
        }
        if pending.end_stream {
            response.ended = true;
        }
    }
}

impl Default for ResponseCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameObserver for ResponseCollector {
    fn observe(&mut self, frame: &Frame) {
        match frame {
            Frame::Headers(h) => {
                let pending = PendingBlock {
                    stream_id: h.stream_id,
                    block: h.header_block.to_vec(),
                    end_stream: h.end_stream,
                };
                if h.end_headers {
                    self.finish_block(pending);
                } else {
                    self.pending = Some(pending);
                }
            }
            Frame::Continuation(c) => {
                let Some(mut pending) = self.pending.take() else {
                    return;
                };
                if pending.stream_id != c.stream_id {
                    return;
                }
                pending.block.extend_from_slice(&c.header_block);
                if c.end_headers {
                    self.finish_block(pending);
                } else {
                    self.pending = Some(pending);
                }
            }
            Frame::Data(d) => {
                let response = self.responses.entry(d.stream_id).or_default();
                response.body_len += d.data.len();
                if d.end_stream {
                    response.ended = true;
                }
            }
            Frame::RstStream(r) => {
                self.responses.entry(r.stream_id).or_default().reset = Some(r.error_code);
            }
            Frame::Goaway(g) => self.goaway = Some(g.clone()),
            _ => {}
        }
    }
}

/// Outcome of one [`ReadLoop::drain`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub frames: usize,
    pub bytes: usize,
    pub decode_errors: usize,
    pub elapsed: Duration,
    /// The peer closed the connection before the window ended
    pub closed_early: bool,
}

/// Receive loop over an established connection
pub struct ReadLoop<'c, T: Transport> {
    conn: &'c mut Connection<T>,
}

impl<'c, T: Transport> ReadLoop<'c, T> {
    pub fn new(conn: &'c mut Connection<T>) -> Self {
        ReadLoop { conn }
    }

    /// Receive and observe frames until `duration` has passed
    ///
    /// A zero duration returns at once without touching the transport. Peer
    /// SETTINGS are still acknowledged while draining.
    pub fn drain<O: FrameObserver + ?Sized>(
        &mut self,
        duration: Duration,
        observer: &mut O,
    ) -> Result<DrainSummary> {
        if !self.conn.is_established() {
            return Err(ConnectionError::NotEstablished);
        }
        let start = Instant::now();
        let mut summary = DrainSummary::default();
        if duration.is_zero() {
            return Ok(summary);
        }

        let sink = Arc::clone(self.conn.sink());
        let backoff = self.conn.config().decode_backoff();
        let deadline = start + duration;
        sink.debug(TARGET, format_args!("observing responses for {:?}", duration));

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let received = match self.conn.recv_frames(Some(remaining)) {
                Ok(received) => received,
                Err(ConnectionError::ConnectionClosed) => {
                    sink.info(
                        TARGET,
                        format_args!("peer closed the connection after {:?}", start.elapsed()),
                    );
                    summary.closed_early = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            summary.bytes += received.bytes;
            for frame in &received.frames {
                observer.observe(frame);
            }
            summary.frames += received.frames.len();

            if !received.decode_errors.is_empty() {
                for e in &received.decode_errors {
                    observer.on_decode_error(e);
                }
                summary.decode_errors += received.decode_errors.len();
                thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
            }
        }

        summary.elapsed = start.elapsed();
        sink.debug(
            TARGET,
            format_args!(
                "read {} frames ({} bytes, {} undecodable) in {:?}",
                summary.frames, summary.bytes, summary.decode_errors, summary.elapsed
            ),
        );
        Ok(summary)
    }
}
