//! HTTP/2 error types
//!
//! This module defines the error taxonomy of the race engine: usage errors,
//! transport errors and recoverable frame decode errors, plus the error codes
//! defined in RFC 7540 Section 7 (used to render RST_STREAM and GOAWAY frames).

use super::stream::StreamId;
use crate::http::tls::TlsError;
use std::fmt;
use std::time::Duration;

/// Connection-level errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error from the transport layer
    #[error("TLS error: {0}")]
    Tls(TlsError),

    /// The server did not select "h2" during ALPN
    #[error("ALPN negotiation failed: expected h2, got {0:?}")]
    AlpnNegotiationFailed(Option<String>),

    /// Host name could not be resolved
    #[error("Cannot resolve {0}")]
    Resolve(String),

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// SETTINGS exchange did not complete in time
    #[error("HTTP/2 handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// `setup` called on a connection that was already set up
    #[error("Connection setup has already been completed with {host}:{port}")]
    AlreadySetup { host: String, port: u16 },

    /// `setup` called again after a failed setup
    #[error("Connection setup with {host}:{port} failed, create a new connection")]
    SetupFailed { host: String, port: u16 },

    /// Operation attempted before the handshake completed
    #[error("Connection setup has not been completed, call setup() first")]
    NotEstablished,

    /// A stream declared a dependency on itself
    #[error("Stream {0} cannot depend on itself")]
    SelfDependency(StreamId),

    /// Dependency chain could not be built from the given ids
    #[error("Invalid dependency chain: {0}")]
    InvalidChain(String),

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Frame decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Header block encoding failed
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Coarse classification of a [`ConnectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the API; never retried
    Usage,
    /// Transport failure; the connection is unusable
    Transport,
    /// Malformed peer data; recoverable
    Decode,
    /// Local encoding failure
    Encode,
}

impl ConnectionError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::AlreadySetup { .. }
            | ConnectionError::SetupFailed { .. }
            | ConnectionError::NotEstablished
            | ConnectionError::SelfDependency(_)
            | ConnectionError::InvalidChain(_)
            | ConnectionError::InvalidSettings(_) => ErrorKind::Usage,
            ConnectionError::Io(_)
            | ConnectionError::Tls(_)
            | ConnectionError::AlpnNegotiationFailed(_)
            | ConnectionError::Resolve(_)
            | ConnectionError::ConnectionClosed
            | ConnectionError::HandshakeTimeout(_) => ErrorKind::Transport,
            ConnectionError::Decode(_) => ErrorKind::Decode,
            ConnectionError::Encode(_) => ErrorKind::Encode,
        }
    }

    /// Whether the error leaves the connection usable
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Decode
    }
}

impl From<TlsError> for ConnectionError {
    fn from(err: TlsError) -> Self {
        match err {
            TlsError::AlpnFailed(selected) => ConnectionError::AlpnNegotiationFailed(selected),
            TlsError::Io(e) => ConnectionError::Io(e),
            other => ConnectionError::Tls(other),
        }
    }
}

/// Frame decoding errors
///
/// These are recoverable: the decoder has already skipped the offending bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Declared payload length exceeds the maximum frame size
    #[error("Frame payload too large: {0}")]
    FrameTooLarge(usize),

    /// Payload does not match the layout of its frame type
    #[error("Invalid {frame_type} payload ({len} bytes): {reason}")]
    InvalidPayload {
        frame_type: &'static str,
        len: usize,
        reason: &'static str,
    },

    /// HPACK header block could not be decoded
    #[error("HPACK decode error: {0}")]
    Hpack(String),
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }

    /// Render a raw wire code, falling back to hex for unknown codes
    pub fn describe(code: u32) -> String {
        match ErrorCode::from_u32(code) {
            Some(known) => known.to_string(),
            None => format!("UNKNOWN (0x{:x})", code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
