//! HTTP/2 client connection with low-level frame control
//!
//! A [`Connection`] owns one transport. It runs the handshake once, then sends
//! frames exactly as given and hands received frames back undigested, which is
//! what the race layer needs: it decides flags, ordering and batching itself.

use super::codec::{FrameCodec, FrameDecoder};
use super::error::{ConnectionError, DecodeError, Result};
use super::frames::{Frame, FrameSequence, SettingsFrame};
use super::handshake::{self, HandshakeState};
use super::request::{authority_for, RequestEncoder};
use super::settings::{Settings, SettingsBuilder, MAX_WINDOW_SIZE};
use super::stream::{StreamId, StreamIdAllocator};
use super::DEFAULT_INITIAL_WINDOW_SIZE;
use crate::http::session::{Connector, Transport};
use crate::sink::EventSink;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TARGET: &str = "h2race::connection";

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    settings: Settings,
    connection_window_increment: Option<u32>,
    handshake_timeout: Duration,
    recv_size: usize,
    decode_backoff: Duration,
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// SETTINGS sent right after the preface
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// WINDOW_UPDATE increment for stream 0 sent with the SETTINGS
    pub fn connection_window_increment(&self) -> Option<u32> {
        self.connection_window_increment
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Bytes asked for per receive
    pub fn recv_size(&self) -> usize {
        self.recv_size
    }

    /// Pause after an undecodable frame
    pub fn decode_backoff(&self) -> Duration {
        self.decode_backoff
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            settings: Settings::race_defaults(),
            connection_window_increment: Some(MAX_WINDOW_SIZE - DEFAULT_INITIAL_WINDOW_SIZE),
            handshake_timeout: Duration::from_secs(10),
            recv_size: 65535,
            decode_backoff: Duration::from_millis(100),
        }
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    settings: SettingsBuilder,
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Start from the race defaults
    pub fn new() -> Self {
        ConnectionConfigBuilder {
            settings: SettingsBuilder::new()
                .enable_push(false)
                .initial_window_size(MAX_WINDOW_SIZE)
                .max_concurrent_streams(1000),
            config: ConnectionConfig::default(),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// Set max frame size we accept
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Connection window increment; `None` sends no WINDOW_UPDATE
    pub fn connection_window_increment(mut self, increment: Option<u32>) -> Self {
        self.config.connection_window_increment = increment;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn recv_size(mut self, size: usize) -> Self {
        self.config.recv_size = size;
        self
    }

    pub fn decode_backoff(mut self, backoff: Duration) -> Self {
        self.config.decode_backoff = backoff;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        let mut config = self.config;
        config.settings = self.settings.build()?;

        if let Some(increment) = config.connection_window_increment {
            if increment == 0 || increment > MAX_WINDOW_SIZE {
                return Err(ConnectionError::InvalidSettings(format!(
                    "Connection window increment {} out of range",
                    increment
                )));
            }
        }
        if config.recv_size == 0 {
            return Err(ConnectionError::InvalidSettings(
                "Receive size must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames from one receive
#[derive(Debug, Default)]
pub struct Received {
    pub frames: Vec<Frame>,
    /// Frames that could not be decoded; their bytes were skipped
    pub decode_errors: Vec<DecodeError>,
    /// Bytes read from the transport
    pub bytes: usize,
}

/// HTTP/2 client connection
///
/// Exclusively owns its transport; one race at a time per connection.
pub struct Connection<T: Transport> {
    config: ConnectionConfig,
    sink: Arc<dyn EventSink>,
    state: HandshakeState,
    peer: Option<(String, u16)>,
    transport: Option<T>,
    decoder: FrameDecoder,
    allocator: StreamIdAllocator,
    encoder: RequestEncoder,
    remote_settings: Settings,
}

impl<T: Transport> Connection<T> {
    pub fn new(config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Self {
        let max_frame_size = config.settings().get_max_frame_size() as usize;
        let decoder = FrameDecoder::with_max_frame_size(max_frame_size);
        Connection {
            config,
            sink,
            state: HandshakeState::Idle,
            peer: None,
            transport: None,
            decoder,
            allocator: StreamIdAllocator::new(),
            encoder: RequestEncoder::new(),
            remote_settings: Settings::new(),
        }
    }

    /// Connect through `connector` and perform the handshake
    pub fn setup<C>(&mut self, connector: &C, host: &str, port: u16) -> Result<()>
    where
        C: Connector<Transport = T>,
    {
        self.check_not_setup()?;
        let transport = match connector.connect(host, port) {
            Ok(transport) => transport,
            Err(e) => {
                self.sink.error(TARGET, format_args!("connect to {}:{} failed: {}", host, port, e));
                self.mark_failed(host, port);
                return Err(e);
            }
        };
        self.setup_with(transport, host, port)
    }

    /// Perform the handshake over an already connected transport
    pub fn setup_with(&mut self, mut transport: T, host: &str, port: u16) -> Result<()> {
        self.check_not_setup()?;

        let mut state = HandshakeState::Idle;
        let result = handshake::perform(
            &mut transport,
            &mut self.decoder,
            &self.config,
            self.sink.as_ref(),
            &mut state,
        );
        self.state = state;

        let peer_settings = match result {
            Ok(settings) => settings,
            Err(e) => {
                self.sink.error(
                    TARGET,
                    format_args!("handshake with {}:{} failed: {}", host, port, e),
                );
                let _ = transport.close();
                self.decoder.clear();
                self.mark_failed(host, port);
                return Err(e);
            }
        };

        self.encoder.set_max_frame_size(peer_settings.get_max_frame_size());
        self.remote_settings = peer_settings;
        self.peer = Some((host.to_string(), port));
        self.transport = Some(transport);
        self.sink.info(
            TARGET,
            format_args!("connection established with {}:{} ({})", host, port, self.scheme()),
        );
        Ok(())
    }

    fn check_not_setup(&self) -> Result<()> {
        match (&self.peer, self.state) {
            (Some((host, port)), HandshakeState::Failed) => Err(ConnectionError::SetupFailed {
                host: host.clone(),
                port: *port,
            }),
            (Some((host, port)), _) => Err(ConnectionError::AlreadySetup {
                host: host.clone(),
                port: *port,
            }),
            (None, _) => Ok(()),
        }
    }

    fn mark_failed(&mut self, host: &str, port: u16) {
        self.state = HandshakeState::Failed;
        self.peer = Some((host.to_string(), port));
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        match (self.state, self.transport.as_mut()) {
            (HandshakeState::Established, Some(transport)) => Ok(transport),
            _ => Err(ConnectionError::NotEstablished),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established && self.transport.is_some()
    }

    pub fn host(&self) -> Option<&str> {
        self.peer.as_ref().map(|(host, _)| host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.peer.as_ref().map(|(_, port)| *port)
    }

    /// Scheme implied by the transport
    pub fn scheme(&self) -> &'static str {
        self.transport.as_ref().map(|t| t.scheme()).unwrap_or("https")
    }

    /// `:authority` for requests on this connection
    pub fn authority(&self) -> Result<String> {
        match &self.peer {
            Some((host, port)) if self.is_established() => {
                Ok(authority_for(self.scheme(), host, *port))
            }
            _ => Err(ConnectionError::NotEstablished),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Settings the peer advertised
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Allocate `count` fresh client stream identifiers
    pub fn next_stream_ids(&mut self, count: usize) -> Result<Vec<StreamId>> {
        self.transport_mut()?;
        let ids = self.allocator.next(count);
        if ids.len() < count {
            return Err(ConnectionError::InvalidChain(format!(
                "Stream identifiers exhausted: wanted {}, got {}",
                count,
                ids.len()
            )));
        }
        Ok(ids)
    }

    /// The connection's request encoder with the scheme and authority to use
    ///
    /// Header blocks must be sent in the order they are encoded.
    pub fn encoder_parts(&mut self) -> Result<(&mut RequestEncoder, &'static str, String)> {
        let authority = self.authority()?;
        let scheme = self.scheme();
        Ok((&mut self.encoder, scheme, authority))
    }

    /// Send frames in order with one transport write; returns bytes written
    pub fn send_frames(&mut self, frames: &[Frame]) -> Result<usize> {
        let mut buf = BytesMut::new();
        for frame in frames {
            FrameCodec::encode_into(frame, &mut buf);
        }

        let sink = Arc::clone(&self.sink);
        self.transport_mut()?.send(&buf)?;

        for frame in frames {
            sink.trace(TARGET, format_args!("sent {}", frame));
        }
        sink.debug(TARGET, format_args!("sent {} frames ({} bytes)", frames.len(), buf.len()));
        Ok(buf.len())
    }

    /// Send all frames of one request
    pub fn send_sequence(&mut self, sequence: &FrameSequence) -> Result<usize> {
        self.send_frames(sequence.frames())
    }

    /// Send `frames` as a single write and time it
    ///
    /// This is the release primitive of a race: every frame is encoded into
    /// one buffer first, so nothing else can interleave.
    pub fn send_atomic(&mut self, frames: &[Frame]) -> Result<Duration> {
        let buf = FrameCodec::encode_all(frames);
        let sink = Arc::clone(&self.sink);
        let transport = self.transport_mut()?;

        let start = Instant::now();
        transport.send(&buf)?;
        let elapsed = start.elapsed();

        let streams: Vec<StreamId> = frames.iter().map(Frame::stream_id).collect();
        sink.info(
            TARGET,
            format_args!(
                "released {} frames ({} bytes) for streams {:?} in {:?}",
                frames.len(),
                buf.len(),
                streams,
                elapsed
            ),
        );
        Ok(elapsed)
    }

    /// Receive once and decode whatever is complete
    ///
    /// Waits at most `timeout`. Peer SETTINGS are acknowledged as they arrive.
    pub fn recv_frames(&mut self, timeout: Option<Duration>) -> Result<Received> {
        let recv_size = self.config.recv_size();
        let bytes = self.transport_mut()?.recv(recv_size, timeout)?;
        self.decoder.feed(&bytes);
        let (frames, decode_errors) = self.decoder.decode_available();

        let mut acks = 0;
        for frame in &frames {
            if let Frame::Settings(s) = frame {
                if !s.ack {
                    self.remote_settings.merge(&s.settings);
                    acks += 1;
                }
            }
        }
        if acks > 0 {
            self.encoder.set_max_frame_size(self.remote_settings.get_max_frame_size());
            let ack = Frame::Settings(SettingsFrame::ack());
            let batch: Vec<Frame> = std::iter::repeat(ack).take(acks).collect();
            self.send_frames(&batch)?;
        }

        for e in &decode_errors {
            self.sink.debug(TARGET, format_args!("skipped undecodable frame: {}", e));
        }

        Ok(Received {
            frames,
            decode_errors,
            bytes: bytes.len(),
        })
    }

    /// Close the transport
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            self.sink.debug(TARGET, format_args!("closing connection"));
            transport.close()?;
        }
        Ok(())
    }
}
