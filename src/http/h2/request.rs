//! Request encoding
//!
//! Turns a symbolic request into the ordered HEADERS / CONTINUATION / DATA
//! frames of one stream.

use super::codec::PRIORITY_FIELD_SIZE;
use super::error::{ConnectionError, Result};
use super::frames::{ContinuationFrame, DataFrame, Frame, FrameSequence, HeadersFrame};
use super::stream::StreamId;
use super::DEFAULT_MAX_FRAME_SIZE;
use bytes::Bytes;
use hpack::Encoder as HpackEncoder;

/// A request to put on a stream
///
/// Immutable once built; the scheme comes from the transport at encoding time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    method: String,
    path: String,
    authority: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl RequestSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        RequestSpec {
            method: method.into(),
            path: path.into(),
            authority: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn builder(method: impl Into<String>, path: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder {
            spec: RequestSpec::new(method, path),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Explicit authority, overriding the connection's
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Builder for [`RequestSpec`]
#[derive(Debug, Clone)]
pub struct RequestSpecBuilder {
    spec: RequestSpec,
}

impl RequestSpecBuilder {
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.spec.authority = Some(authority.into());
        self
    }

    /// Append a header; order is preserved on the wire
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        self.spec
            .headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.spec.body = body.into();
        self
    }

    pub fn build(self) -> RequestSpec {
        self.spec
    }
}

/// Authority for `host` and `port`: the bare host on the scheme's default port
pub fn authority_for(scheme: &str, host: &str, port: u16) -> String {
    match (scheme, port) {
        ("https", 443) | ("http", 80) => host.to_string(),
        _ => format!("{}:{}", host, port),
    }
}

/// Stateful HPACK request encoder for one connection
///
/// The dynamic table is shared by every request, so header blocks must reach
/// the wire in the order they were encoded.
pub struct RequestEncoder {
    hpack: HpackEncoder<'static>,
    max_frame_size: usize,
}

impl RequestEncoder {
    pub fn new() -> Self {
        RequestEncoder {
            hpack: HpackEncoder::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }

    /// Use the peer's SETTINGS_MAX_FRAME_SIZE when splitting frames
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        // Anything below the protocol minimum is not a valid peer setting
        self.max_frame_size = max_frame_size.max(DEFAULT_MAX_FRAME_SIZE) as usize;
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// HPACK-encode the request line and headers
    pub fn encode_header_block(
        &mut self,
        spec: &RequestSpec,
        scheme: &str,
        authority: &str,
    ) -> Result<Bytes> {
        let authority = spec.authority().unwrap_or(authority);
        let lowered: Vec<(String, &str)> = spec
            .headers()
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();

        let mut fields: Vec<(&[u8], &[u8])> = vec![
            (&b":method"[..], spec.method().as_bytes()),
            (&b":path"[..], spec.path().as_bytes()),
            (&b":scheme"[..], scheme.as_bytes()),
            (&b":authority"[..], authority.as_bytes()),
        ];
        fields.extend(lowered.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));

        let mut block = Vec::new();
        self.hpack
            .encode_into(fields, &mut block)
            .map_err(|e| ConnectionError::Encode(format!("HPACK encode error: {}", e)))?;
        Ok(Bytes::from(block))
    }

    /// Encode `spec` with `body` as the frames of `stream_id`
    ///
    /// END_STREAM is set on the last DATA frame, or on HEADERS when `body` is
    /// empty. The first HEADERS fragment leaves room for a priority field.
    pub fn encode(
        &mut self,
        spec: &RequestSpec,
        body: &Bytes,
        stream_id: StreamId,
        scheme: &str,
        authority: &str,
    ) -> Result<FrameSequence> {
        let block = self.encode_header_block(spec, scheme, authority)?;
        let mut frames = Vec::new();

        let first_len = block.len().min(self.max_frame_size - PRIORITY_FIELD_SIZE);
        let mut rest = block.slice(first_len..);
        frames.push(Frame::Headers(HeadersFrame::new(
            stream_id,
            block.slice(..first_len),
            body.is_empty(),
            rest.is_empty(),
        )));

        while !rest.is_empty() {
            let chunk = rest.split_to(rest.len().min(self.max_frame_size));
            frames.push(Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: chunk,
                end_headers: rest.is_empty(),
            }));
        }

        let mut body = body.clone();
        while !body.is_empty() {
            let chunk = body.split_to(body.len().min(self.max_frame_size));
            frames.push(Frame::Data(DataFrame::new(stream_id, chunk, body.is_empty())));
        }

        Ok(FrameSequence::new(frames))
    }
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::FrameType;

    fn decode_block(frames: &FrameSequence) -> Vec<(String, String)> {
        let mut block = Vec::new();
        for frame in frames {
            match frame {
                Frame::Headers(h) => block.extend_from_slice(&h.header_block),
                Frame::Continuation(c) => block.extend_from_slice(&c.header_block),
                _ => {}
            }
        }
        hpack::Decoder::new()
            .decode(&block)
            .unwrap()
            .into_iter()
            .map(|(n, v)| (String::from_utf8(n).unwrap(), String::from_utf8(v).unwrap()))
            .collect()
    }

    #[test]
    fn test_authority_rule() {
        assert_eq!(authority_for("https", "example.com", 443), "example.com");
        assert_eq!(authority_for("https", "example.com", 8443), "example.com:8443");
        assert_eq!(authority_for("http", "localhost", 80), "localhost");
        assert_eq!(authority_for("http", "localhost", 443), "localhost:443");
    }

    #[test]
    fn test_request_line_order() {
        let spec = RequestSpec::builder("POST", "/transfer")
            .header("X-Token", "abc")
            .body("amount=1")
            .build();
        let mut encoder = RequestEncoder::new();
        let frames = encoder
            .encode(&spec, spec.body(), 1, "https", "bank.test")
            .unwrap();

        let headers = decode_block(&frames);
        assert_eq!(
            headers,
            vec![
                (":method".to_string(), "POST".to_string()),
                (":path".to_string(), "/transfer".to_string()),
                (":scheme".to_string(), "https".to_string()),
                (":authority".to_string(), "bank.test".to_string()),
                ("x-token".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_end_stream_on_last_frame() {
        let spec = RequestSpec::builder("POST", "/").body("hello").build();
        let mut encoder = RequestEncoder::new();
        let frames = encoder.encode(&spec, spec.body(), 3, "https", "h").unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames.frames()[0].is_type(FrameType::Headers));
        assert!(!frames.frames()[0].is_end_stream());
        assert!(frames.frames()[1].is_end_stream());
        assert_eq!(frames.end_stream_count(), 1);
        assert_eq!(frames.body_len(), 5);
    }

    #[test]
    fn test_empty_body_ends_on_headers() {
        let spec = RequestSpec::new("GET", "/");
        let mut encoder = RequestEncoder::new();
        let frames = encoder.encode(&spec, spec.body(), 1, "http", "h").unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames.frames()[0].is_end_stream());
    }

    #[test]
    fn test_large_header_block_uses_continuation() {
        let spec = RequestSpec::builder("GET", "/")
            .header("x-big", "v".repeat(20_000))
            .build();
        let mut encoder = RequestEncoder::new();
        let frames = encoder.encode(&spec, spec.body(), 1, "https", "h").unwrap();

        assert_eq!(frames.len(), 2);
        let headers = frames.headers().unwrap();
        assert!(!headers.end_headers);
        assert_eq!(
            headers.header_block.len(),
            DEFAULT_MAX_FRAME_SIZE as usize - PRIORITY_FIELD_SIZE
        );
        match frames.frames().last() {
            Some(Frame::Continuation(c)) => assert!(c.end_headers),
            other => panic!("unexpected last frame {:?}", other),
        }
        assert_eq!(decode_block(&frames)[4].1.len(), 20_000);
    }

    #[test]
    fn test_body_split_by_max_frame_size() {
        let body = Bytes::from(vec![b'a'; 40_000]);
        let spec = RequestSpec::builder("POST", "/upload").body(body.clone()).build();
        let mut encoder = RequestEncoder::new();
        let frames = encoder.encode(&spec, &body, 1, "https", "h").unwrap();

        // HEADERS + 16384 + 16384 + 7232
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.body_len(), 40_000);
        assert_eq!(frames.end_stream_count(), 1);
        assert!(frames.frames()[3].is_end_stream());
    }

    #[test]
    fn test_explicit_authority_wins() {
        let spec = RequestSpec::builder("GET", "/").authority("other:8080").build();
        let mut encoder = RequestEncoder::new();
        let frames = encoder.encode(&spec, spec.body(), 1, "https", "h").unwrap();
        assert_eq!(decode_block(&frames)[3].1, "other:8080");
    }
}
