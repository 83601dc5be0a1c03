//! HTTP/2 wire layer
//!
//! # Architecture
//!
//! The protocol code never touches a socket directly. It talks to a
//! [`Transport`], which hides whether bytes go over plain TCP or TLS:
//!
//! - [`Transport`] defines the operations (send, recv with timeout, close)
//! - [`Connector`] opens a transport to `host:port`
//! - [`session`] has the plain TCP implementation, [`tls`] the OpenSSL one
//! - [`h2`] builds, encodes and decodes frames on top of either
//!
//! # Examples
//!
//! ```no_run
//! use h2race::http::{Connector, TcpConnector, Transport};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = TcpConnector::new().connect("127.0.0.1", 8080)?;
//! transport.send(h2race::http::h2::CONNECTION_PREFACE)?;
//! let reply = transport.recv(65535, Some(Duration::from_secs(1)))?;
//! println!("{} bytes", reply.len());
//! # Ok(())
//! # }
//! ```

pub mod h2;
pub mod session;
pub mod tls;

pub use session::{Connector, TcpConnector, TcpTransport, Transport};

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;
