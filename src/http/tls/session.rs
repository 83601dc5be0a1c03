//! TLS transport
//!
//! This module implements the [`Transport`] trait for TLS connections and the
//! connector that opens them with ALPN "h2".

use super::config::{TlsConfig, TlsError, ALPN_H2};
use super::info::TlsInfo;
use crate::http::h2::error::{ConnectionError, Result};
use crate::http::session::{open_socket, poll_readable, Connector, Transport};
use bytes::Bytes;
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS transport
///
/// Wraps an OpenSSL SslStream over a blocking TCP socket.
pub struct TlsTransport {
    stream: SslStream<TcpStream>,
    info: TlsInfo,
    failed: bool,
}

impl TlsTransport {
    /// Perform the client handshake and check the ALPN outcome
    pub(crate) fn connect(
        tcp_stream: TcpStream,
        config: &TlsConfig,
        host: &str,
    ) -> std::result::Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        let servername = config.servername.as_deref().unwrap_or(host);
        let ip = servername.parse::<IpAddr>().ok();

        if config.verify_peer {
            match ip {
                Some(ip) => ssl.param_mut().set_ip(ip)?,
                None => ssl.param_mut().set_host(servername)?,
            }
        }
        // SNI carries host names only
        if ip.is_none() {
            ssl.set_hostname(servername)?;
        }

        let stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;
        let info = TlsInfo::from_ssl(stream.ssl());

        // Whatever the client offered, only "h2" carries the race
        if info.alpn.as_deref() != Some(ALPN_H2) {
            return Err(TlsError::AlpnFailed(info.alpn));
        }

        Ok(TlsTransport {
            stream,
            info,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub(crate) fn accept(
        tcp_stream: TcpStream,
        config: &TlsConfig,
    ) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;
        let info = TlsInfo::from_ssl(stream.ssl());

        Ok(TlsTransport {
            stream,
            info,
            failed: false,
        })
    }

    /// Negotiated parameters
    pub fn info(&self) -> &TlsInfo {
        &self.info
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn fail(&mut self, err: io::Error) -> ConnectionError {
        self.failed = true;
        ConnectionError::Io(err)
    }
}

impl Transport for TlsTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.stream.write_all(bytes).and_then(|_| self.stream.flush()) {
            return Err(self.fail(e));
        }
        Ok(())
    }

    fn recv(&mut self, max_size: usize, timeout: Option<Duration>) -> Result<Bytes> {
        // Decrypted bytes may already be buffered inside OpenSSL
        if self.stream.ssl().pending() == 0
            && !poll_readable(self.stream.get_ref().as_raw_fd(), timeout)?
        {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; max_size.max(1)];
        match self.stream.ssl_read(&mut buf) {
            Ok(0) => Err(ConnectionError::ConnectionClosed),
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(e) => match e.code() {
                ErrorCode::ZERO_RETURN => Err(ConnectionError::ConnectionClosed),
                ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => Ok(Bytes::new()),
                ErrorCode::SYSCALL if e.io_error().is_none() => {
                    Err(ConnectionError::ConnectionClosed)
                }
                _ => {
                    self.failed = true;
                    match e.into_io_error() {
                        Ok(io_err) => Err(ConnectionError::Io(io_err)),
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("unexpected eof") {
                                Err(ConnectionError::ConnectionClosed)
                            } else {
                                Err(ConnectionError::Tls(TlsError::Stream(msg)))
                            }
                        }
                    }
                }
            },
        }
    }

    fn scheme(&self) -> &'static str {
        "https"
    }

    fn close(&mut self) -> Result<()> {
        // Perform SSL shutdown if not failed
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Connector for TLS targets
///
/// Opens the socket, performs the handshake with ALPN and fails with
/// [`ConnectionError::AlpnNegotiationFailed`] unless the server picked "h2".
#[derive(Clone)]
pub struct TlsConnector {
    config: TlsConfig,
    connect_timeout: Option<Duration>,
}

impl TlsConnector {
    /// Connector with the default client configuration
    pub fn new() -> std::result::Result<Self, TlsError> {
        Ok(Self::with_config(TlsConfig::client().build()?))
    }

    pub fn with_config(config: TlsConfig) -> Self {
        TlsConnector {
            config,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Bound for the TCP connect and the TLS handshake
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl Connector for TlsConnector {
    type Transport = TlsTransport;

    fn connect(&self, host: &str, port: u16) -> Result<TlsTransport> {
        let stream = open_socket(host, port, self.connect_timeout)?;

        stream.set_read_timeout(self.connect_timeout)?;
        stream.set_write_timeout(self.connect_timeout)?;
        let transport = self.config.connect(stream, host)?;
        transport.get_ref().set_read_timeout(None)?;
        transport.get_ref().set_write_timeout(None)?;

        Ok(transport)
    }
}
