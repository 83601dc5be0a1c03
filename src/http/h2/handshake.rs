//! Connection preface and SETTINGS exchange (RFC 7540 Section 3.5)
//!
//! The client writes the preface, its SETTINGS and an optional connection
//! WINDOW_UPDATE, then reads until the peer has acknowledged our SETTINGS and
//! we have acknowledged the peer's. Non-SETTINGS frames seen meanwhile are
//! logged and otherwise ignored.

use super::codec::{FrameCodec, FrameDecoder};
use super::connection::ConnectionConfig;
use super::error::{ConnectionError, Result};
use super::frames::{Frame, SettingsFrame, WindowUpdateFrame};
use super::settings::Settings;
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use crate::http::session::Transport;
use crate::sink::EventSink;
use bytes::BytesMut;
use std::fmt;
use std::thread;
use std::time::Instant;

const TARGET: &str = "h2race::handshake";

/// Handshake progress of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    PrefaceSent,
    SettingsExchanging,
    Established,
    /// The handshake or connect failed; the connection cannot be reused
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Idle => "idle",
            HandshakeState::PrefaceSent => "preface-sent",
            HandshakeState::SettingsExchanging => "settings-exchanging",
            HandshakeState::Established => "established",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the caller must do after feeding a frame to [`SettingsExchange`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStep {
    /// Peer sent its SETTINGS; reply with an ACK
    SendAck,
    /// Peer acknowledged our SETTINGS
    PeerAcked,
    /// Nothing to do
    Ignored,
}

/// Bookkeeping for both directions of the SETTINGS exchange
#[derive(Debug, Clone, Default)]
pub struct SettingsExchange {
    peer_acked: bool,
    acked_peer: bool,
    peer_settings: Settings,
}

impl SettingsExchange {
    pub fn new() -> Self {
        SettingsExchange::default()
    }

    /// Account for one received frame
    ///
    /// Every un-ACKed SETTINGS asks for exactly one ACK; its values are merged
    /// into the peer settings.
    pub fn on_frame(&mut self, frame: &Frame) -> ExchangeStep {
        match frame {
            Frame::Settings(s) if s.ack => {
                self.peer_acked = true;
                ExchangeStep::PeerAcked
            }
            Frame::Settings(s) => {
                self.peer_settings.merge(&s.settings);
                self.acked_peer = true;
                ExchangeStep::SendAck
            }
            _ => ExchangeStep::Ignored,
        }
    }

    pub fn peer_acked(&self) -> bool {
        self.peer_acked
    }

    pub fn acked_peer(&self) -> bool {
        self.acked_peer
    }

    pub fn is_complete(&self) -> bool {
        self.peer_acked && self.acked_peer
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    pub fn into_peer_settings(self) -> Settings {
        self.peer_settings
    }
}

fn transition(sink: &dyn EventSink, state: &mut HandshakeState, next: HandshakeState) {
    sink.debug(TARGET, format_args!("handshake {} -> {}", state, next));
    *state = next;
}

/// Run the client side of the handshake
///
/// Returns the peer's SETTINGS. Bytes that arrive after the exchange
/// completes stay buffered in `decoder`.
pub(crate) fn perform<T: Transport>(
    transport: &mut T,
    decoder: &mut FrameDecoder,
    config: &ConnectionConfig,
    sink: &dyn EventSink,
    state: &mut HandshakeState,
) -> Result<Settings> {
    let start = Instant::now();
    let deadline = start + config.handshake_timeout();

    // Preface, SETTINGS and WINDOW_UPDATE leave in one write
    let mut opening = BytesMut::from(CONNECTION_PREFACE);
    let settings = Frame::Settings(SettingsFrame::new(config.settings().clone()));
    FrameCodec::encode_into(&settings, &mut opening);
    if let Some(increment) = config.connection_window_increment() {
        FrameCodec::encode_into(
            &Frame::WindowUpdate(WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment)),
            &mut opening,
        );
    }
    transport.send(&opening)?;
    transition(sink, state, HandshakeState::PrefaceSent);
    sink.debug(TARGET, format_args!("sent SETTINGS {}", config.settings()));

    let ack = FrameCodec::encode(&Frame::Settings(SettingsFrame::ack()));
    let mut exchange = SettingsExchange::new();

    while !exchange.is_complete() {
        let now = Instant::now();
        if now >= deadline {
            return Err(ConnectionError::HandshakeTimeout(config.handshake_timeout()));
        }

        let bytes = transport.recv(config.recv_size(), Some(deadline - now))?;
        if bytes.is_empty() {
            continue;
        }
        if *state == HandshakeState::PrefaceSent {
            transition(sink, state, HandshakeState::SettingsExchanging);
        }
        decoder.feed(&bytes);

        while !exchange.is_complete() {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    sink.debug(TARGET, format_args!("ignoring undecodable frame: {}", e));
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    thread::sleep(config.decode_backoff().min(remaining));
                    continue;
                }
            };

            match exchange.on_frame(&frame) {
                ExchangeStep::SendAck => {
                    sink.debug(TARGET, format_args!("peer SETTINGS {}", exchange.peer_settings()));
                    transport.send(&ack)?;
                }
                ExchangeStep::PeerAcked => {
                    sink.debug(TARGET, format_args!("peer acknowledged SETTINGS"))
                }
                ExchangeStep::Ignored => {
                    sink.debug(TARGET, format_args!("ignoring {} during handshake", frame))
                }
            }
        }
    }

    transition(sink, state, HandshakeState::Established);
    sink.debug(TARGET, format_args!("handshake took {:?}", start.elapsed()));
    Ok(exchange.into_peer_settings())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_exchange_either_order() {
        let peer = SettingsBuilder::new().max_concurrent_streams(100).build().unwrap();
        let settings = Frame::Settings(SettingsFrame::new(peer.clone()));
        let ack = Frame::Settings(SettingsFrame::ack());

        let mut first = SettingsExchange::new();
        assert_eq!(first.on_frame(&settings), ExchangeStep::SendAck);
        assert!(!first.is_complete());
        assert_eq!(first.on_frame(&ack), ExchangeStep::PeerAcked);
        assert!(first.is_complete());

        let mut second = SettingsExchange::new();
        assert_eq!(second.on_frame(&ack), ExchangeStep::PeerAcked);
        assert!(second.peer_acked() && !second.acked_peer());
        assert_eq!(second.on_frame(&settings), ExchangeStep::SendAck);
        assert!(second.is_complete());
        assert_eq!(second.peer_settings(), &peer);
    }

    #[test]
    fn test_exchange_ignores_other_frames() {
        let mut exchange = SettingsExchange::new();
        let ping = Frame::Ping(crate::http::h2::frames::PingFrame::new([0; 8]));
        assert_eq!(exchange.on_frame(&ping), ExchangeStep::Ignored);
        assert!(!exchange.peer_acked());
        assert!(!exchange.acked_peer());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(HandshakeState::SettingsExchanging.to_string(), "settings-exchanging");
    }
}
