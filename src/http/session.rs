//! Transport abstraction
//!
//! The HTTP/2 layer only ever talks to a [`Transport`]: a connected,
//! already-negotiated byte stream. [`Connector`] opens one. Plain TCP lives
//! here; TLS with ALPN lives in [`crate::http::tls`].

use super::h2::error::{ConnectionError, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Byte-oriented duplex stream the HTTP/2 connection runs on
pub trait Transport {
    /// Write all of `bytes` as one logical write
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive up to `max_size` bytes
    ///
    /// Waits at most `timeout` (`None` blocks) and returns an empty buffer
    /// when nothing arrived. End of stream is [`ConnectionError::ConnectionClosed`].
    fn recv(&mut self, max_size: usize, timeout: Option<Duration>) -> Result<Bytes>;

    /// URI scheme implied by the transport
    fn scheme(&self) -> &'static str;

    /// Close the transport
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn recv(&mut self, max_size: usize, timeout: Option<Duration>) -> Result<Bytes> {
        (**self).recv(max_size, timeout)
    }

    fn scheme(&self) -> &'static str {
        (**self).scheme()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Opens transports to a host
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, host: &str, port: u16) -> Result<Self::Transport>;
}

/// Wait for `fd` to become readable
///
/// Returns true if the descriptor is ready before `timeout` expires.
pub fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN};

    let mut pfd = pollfd {
        fd,
        events: POLLIN,
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1); // -1 = infinite

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }

    Ok(result > 0)
}

/// Resolve `host:port`
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectionError::Resolve(format!("{}:{}: {}", host, port, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectionError::Resolve(format!("{}:{}: no addresses", host, port)));
    }
    Ok(addrs)
}

/// Open a TCP connection tuned for race traffic
///
/// Address and port reuse are enabled, and Nagle is disabled so a batch
/// written in one call leaves in as few segments as possible. Every resolved
/// address is tried in turn.
pub fn open_socket(host: &str, port: u16, connect_timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in resolve(host, port)? {
        match connect_addr(addr, connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(ConnectionError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "no address could be connected")
    })))
}

fn connect_addr(addr: SocketAddr, connect_timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nodelay(true)?;

    let target = SockAddr::from(addr);
    match connect_timeout {
        Some(timeout) => socket.connect_timeout(&target, timeout)?,
        None => socket.connect(&target)?,
    }
    Ok(TcpStream::from(socket))
}

/// Read once from a readable stream, mapping EOF and spurious wakeups
pub(crate) fn read_available<R: Read>(reader: &mut R, max_size: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; max_size.max(1)];
    match reader.read(&mut buf) {
        Ok(0) => Err(ConnectionError::ConnectionClosed),
        Ok(n) => {
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(Bytes::new())
        }
        Err(e) => Err(ConnectionError::Io(e)),
    }
}

/// Plain TCP transport (prior-knowledge h2c)
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, max_size: usize, timeout: Option<Duration>) -> Result<Bytes> {
        if !poll_readable(self.stream.as_raw_fd(), timeout)? {
            return Ok(Bytes::new());
        }
        read_available(&mut self.stream, max_size)
    }

    fn scheme(&self) -> &'static str {
        "http"
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Connector for plain TCP targets
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> Self {
        TcpConnector::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect(&self, host: &str, port: u16) -> Result<TcpTransport> {
        let stream = open_socket(host, port, self.connect_timeout)?;
        Ok(TcpTransport::new(stream))
    }
}
