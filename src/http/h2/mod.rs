//! HTTP/2 protocol layer
//!
//! Byte-exact HTTP/2 framing for crafting race traffic: frames are built and
//! encoded exactly as the caller shapes them, so flags can be stripped and
//! priority fields spliced in before anything reaches the socket.
//!
//! # Architecture
//!
//! - [`frames`] / [`codec`]: typed frames and their wire encoding, including a
//!   buffered decoder that tolerates frames split across reads
//! - [`settings`]: SETTINGS parameters and payload encoding
//! - [`request`]: HPACK request encoding into HEADERS / CONTINUATION / DATA
//! - [`stream`]: client stream identifier allocation
//! - [`handshake`] / [`connection`]: preface, SETTINGS exchange and the
//!   established connection that the race layer writes through
//!
//! # Example
//!
//! ```no_run
//! use h2race::http::h2::{Connection, ConnectionConfig};
//! use h2race::http::tls::TlsConnector;
//! use h2race::sink::LogSink;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = TlsConnector::new()?;
//! let mut conn = Connection::new(ConnectionConfig::default(), Arc::new(LogSink));
//! conn.setup(&connector, "example.com", 443)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod frames;
pub mod handshake;
pub mod request;
pub mod settings;
pub mod stream;

pub use codec::{FrameCodec, FrameDecoder};
pub use connection::{Connection, ConnectionConfig, ConnectionConfigBuilder};
pub use error::{ConnectionError, DecodeError, ErrorCode, ErrorKind, Result};
pub use frames::{
    DataFrame, Frame, FrameFlags, FrameSequence, FrameType, HeadersFrame, PrioritySpec,
    SettingsFrame,
};
pub use handshake::HandshakeState;
pub use request::{RequestEncoder, RequestSpec, RequestSpecBuilder};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamId, StreamIdAllocator};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
