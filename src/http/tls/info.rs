//! Negotiated TLS parameters

use super::cert;
use openssl::ssl::{NameType, SslRef};
use std::fmt;

/// What a completed handshake agreed on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// Protocol version (e.g. "TLSv1.3")
    pub version: String,
    /// Cipher name
    pub cipher: Option<String>,
    /// SNI servername sent or received
    pub servername: Option<String>,
    /// Protocol selected by ALPN
    pub alpn: Option<String>,
    /// Common Name of the peer certificate
    pub peer_subject: Option<String>,
}

impl TlsInfo {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        TlsInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl.current_cipher().map(|c| c.name().to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            peer_subject: ssl
                .peer_certificate()
                .map(|c| cert::common_name(c.subject_name())),
        }
    }
}

impl fmt::Display for TlsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cipher={} alpn={} peer={}",
            self.version,
            self.cipher.as_deref().unwrap_or("<undef>"),
            self.alpn.as_deref().unwrap_or("<none>"),
            self.peer_subject.as_deref().unwrap_or("<undef>")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_placeholders() {
        let info = TlsInfo {
            version: "TLSv1.3".to_string(),
            alpn: Some("h2".to_string()),
            ..TlsInfo::default()
        };
        assert_eq!(info.to_string(), "TLSv1.3 cipher=<undef> alpn=h2 peer=<undef>");
    }
}
