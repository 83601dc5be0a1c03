//! TLS transport with ALPN
//!
//! Races run over HTTP/2, which browsers and most servers only speak over TLS
//! with "h2" selected by ALPN. This module wraps OpenSSL:
//!
//! 1. [`TlsConfig`] defines TLS settings (versions, ALPN, verification, certificates)
//! 2. [`TlsTransport`] implements [`Transport`](crate::http::Transport) over an `SslStream`
//! 3. [`TlsConnector`] opens the socket, runs the handshake and insists on "h2"
//!
//! # Examples
//!
//! ```no_run
//! use h2race::http::tls::{TlsConfig, TlsConnector};
//! use h2race::http::Connector;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TlsConfig::client()
//!     .servername("example.com")
//!     .build()?;
//! let transport = TlsConnector::with_config(config).connect("example.com", 443)?;
//! println!("{}", transport.info());
//! # Ok(())
//! # }
//! ```

pub mod cert;
pub mod config;
pub mod info;
pub mod session;

pub use config::{
    ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion, ALPN_H2,
};
pub use info::TlsInfo;
pub use session::{TlsConnector, TlsTransport};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
