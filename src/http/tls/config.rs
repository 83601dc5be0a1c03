//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.
//! Builders only collect options; the OpenSSL context is created in `build()`.

use super::cert;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{AlpnError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Protocol selected for HTTP/2 over TLS
pub const ALPN_H2: &str = "h2";

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" | "1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" | "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("TLS stream error: {0}")]
    Stream(String),

    /// Peer did not select an acceptable protocol; carries what it selected
    #[error("ALPN negotiation failed: got {0:?}")]
    AlpnFailed(Option<String>),
}

/// Encode protocol names in ALPN wire format (length-prefixed)
pub(crate) fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut wire = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| {
                TlsError::InvalidConfig(format!("Invalid ALPN protocol name: {:?}", proto))
            })?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

fn apply_versions(
    ctx: &mut SslContextBuilder,
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
) -> Result<(), TlsError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(TlsError::InvalidConfig(format!(
                "Minimum version {} is above maximum {}",
                min.as_str(),
                max.as_str()
            )));
        }
    }
    ctx.set_min_proto_version(min.map(TlsVersion::to_openssl_version))?;
    ctx.set_max_proto_version(max.map(TlsVersion::to_openssl_version))?;
    Ok(())
}

fn load_pem(path: &Path) -> Result<(X509, PKey<Private>), TlsError> {
    let mut pem = Vec::new();
    File::open(path)?.read_to_end(&mut pem)?;

    let cert = X509::from_pem(&pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
    let key = PKey::private_key_from_pem(&pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    Ok((cert, key))
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
    pub(crate) alpn: Vec<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// Protocols offered (client) or accepted (server)
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn
    }

    /// Explicit SNI servername, if any
    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    /// Connect to a server with TLS (client-side)
    ///
    /// `host` is used for SNI and certificate verification unless a
    /// servername was configured.
    pub fn connect(
        &self,
        stream: std::net::TcpStream,
        host: &str,
    ) -> Result<super::TlsTransport, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        super::session::TlsTransport::connect(stream, self, host)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: std::net::TcpStream) -> Result<super::TlsTransport, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        super::session::TlsTransport::accept(stream, self)
    }
}

/// Client configuration builder
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    alpn: Vec<String>,
    servername: Option<String>,
    verify_peer: bool,
    ca_file: Option<PathBuf>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            alpn: vec![ALPN_H2.to_string()],
            servername: None,
            verify_peer: true,
            ca_file: None,
            min_version: Some(TlsVersion::Tls12),
            max_version: None,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = Some(version);
        self.max_version = Some(version);
        self
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set ALPN protocols, in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust the CA certificates in `path` instead of the system store
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;
        apply_versions(&mut ctx, self.min_version, self.max_version)?;

        if !self.alpn.is_empty() {
            ctx.set_alpn_protos(&encode_alpn(&self.alpn)?)?;
        }

        if self.verify_peer {
            ctx.set_verify(SslVerifyMode::PEER);
            match &self.ca_file {
                Some(path) => ctx.set_ca_file(path)?,
                None => ctx.set_default_verify_paths()?,
            }
        } else {
            ctx.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: false,
            servername: self.servername,
            verify_peer: self.verify_peer,
            alpn: self.alpn,
        })
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum ServerCert {
    None,
    Pem(PathBuf),
    SelfSigned(String),
}

/// Server configuration builder
///
/// Used for loopback peers in tests and local experiments.
pub struct ServerConfigBuilder {
    alpn: Vec<String>,
    cert: ServerCert,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        ServerConfigBuilder {
            alpn: Vec::new(),
            cert: ServerCert::None,
            min_version: Some(TlsVersion::Tls12),
            max_version: None,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = Some(version);
        self.max_version = Some(version);
        self
    }

    /// Accept these ALPN protocols; the first one the client offers wins
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Load certificate and private key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cert = ServerCert::Pem(path.as_ref().to_path_buf());
        self
    }

    /// Generate a throwaway certificate for `common_name`
    pub fn self_signed(mut self, common_name: impl Into<String>) -> Self {
        self.cert = ServerCert::SelfSigned(common_name.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;
        apply_versions(&mut ctx, self.min_version, self.max_version)?;

        let (cert, key) = match &self.cert {
            ServerCert::None => {
                return Err(TlsError::InvalidConfig(
                    "Server requires a certificate".to_string(),
                ))
            }
            ServerCert::Pem(path) => load_pem(path)?,
            ServerCert::SelfSigned(cn) => cert::generate_self_signed(cn)?,
        };
        ctx.set_certificate(&cert)?;
        ctx.set_private_key(&key)?;
        ctx.check_private_key()?;

        if !self.alpn.is_empty() {
            let accepted: Vec<Vec<u8>> = self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
            ctx.set_alpn_select_callback(move |_ssl, client_protos| {
                // Client protocols are length-prefixed
                let mut pos = 0;
                while pos < client_protos.len() {
                    let len = client_protos[pos] as usize;
                    pos += 1;
                    if pos + len > client_protos.len() {
                        break;
                    }
                    let client_proto = &client_protos[pos..pos + len];
                    if accepted.iter().any(|p| p.as_slice() == client_proto) {
                        return Ok(client_proto);
                    }
                    pos += len;
                }
                Err(AlpnError::NOACK)
            });
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: true,
            servername: None,
            verify_peer: false,
            alpn: self.alpn,
        })
    }
}
