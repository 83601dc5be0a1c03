//! Request assembly with a withheld final byte
//!
//! A withheld request leaves the peer one byte short: the body goes out
//! without its last byte and no frame carries END_STREAM. The matching
//! [`CompletionFrame`] carries that byte plus END_STREAM and is what a race
//! releases. A request without a body is withheld by clearing END_STREAM on
//! its HEADERS; its completion is an empty DATA frame.

use crate::http::h2::error::{ConnectionError, Result};
use crate::http::h2::frames::{DataFrame, Frame, FrameSequence, PrioritySpec};
use crate::http::h2::request::{RequestEncoder, RequestSpec};
use crate::http::h2::stream::StreamId;
use crate::http::h2::Connection;
use crate::http::session::Transport;
use bytes::Bytes;

/// Priority annotation of one stream (RFC 7540 Section 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyLink {
    pub stream_id: StreamId,
    pub depends_on: StreamId,
    /// Wire weight, 0-255
    pub weight: u8,
    pub exclusive: bool,
}

impl DependencyLink {
    /// `stream_id` depends on `depends_on` with weight 0, non-exclusive
    pub fn new(stream_id: StreamId, depends_on: StreamId) -> Self {
        DependencyLink {
            stream_id,
            depends_on,
            weight: 0,
            exclusive: false,
        }
    }

    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Reject a stream depending on itself
    pub fn validate(&self) -> Result<()> {
        if self.depends_on == self.stream_id {
            return Err(ConnectionError::SelfDependency(self.stream_id));
        }
        Ok(())
    }

    /// Priority field for the stream's HEADERS frame
    pub fn priority_spec(&self) -> PrioritySpec {
        PrioritySpec::new(self.depends_on, self.exclusive, self.weight)
    }
}

/// The DATA frame that completes a withheld request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFrame(DataFrame);

impl CompletionFrame {
    pub fn new(stream_id: StreamId, withheld: Bytes) -> Self {
        CompletionFrame(DataFrame::new(stream_id, withheld, true))
    }

    pub fn stream_id(&self) -> StreamId {
        self.0.stream_id
    }

    /// The withheld byte, or nothing for a bodiless request
    pub fn data(&self) -> &Bytes {
        &self.0.data
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Data(self.0.clone())
    }

    pub fn into_frame(self) -> Frame {
        Frame::Data(self.0)
    }
}

/// A request sent without its final byte, and the frame that completes it
#[derive(Debug, Clone)]
pub struct WithheldRequest {
    pub spec: RequestSpec,
    pub stream_id: StreamId,
    pub link: Option<DependencyLink>,
    /// Everything but the last body byte; no frame carries END_STREAM
    pub frames: FrameSequence,
    pub completion: CompletionFrame,
}

/// Builds request frame sequences on a connection's encoder
///
/// Sequences share the connection's HPACK state: send them in the order
/// they were built.
pub struct RequestAssembler<'a> {
    encoder: &'a mut RequestEncoder,
    scheme: &'static str,
    authority: String,
}

impl<'a> RequestAssembler<'a> {
    pub fn new(
        encoder: &'a mut RequestEncoder,
        scheme: &'static str,
        authority: impl Into<String>,
    ) -> Self {
        RequestAssembler {
            encoder,
            scheme,
            authority: authority.into(),
        }
    }

    /// Assembler bound to an established connection
    pub fn for_connection<T: Transport>(conn: &'a mut Connection<T>) -> Result<Self> {
        let (encoder, scheme, authority) = conn.encoder_parts()?;
        Ok(RequestAssembler::new(encoder, scheme, authority))
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Frames for `spec` on `stream_id`
    ///
    /// With `withhold_last_byte` the body loses its final byte and END_STREAM
    /// is cleared from every frame, whatever the encoder decided.
    pub fn build(
        &mut self,
        spec: &RequestSpec,
        stream_id: StreamId,
        withhold_last_byte: bool,
    ) -> Result<FrameSequence> {
        let body = if withhold_last_byte {
            let body = spec.body();
            body.slice(..body.len().saturating_sub(1))
        } else {
            spec.body().clone()
        };

        let mut frames = self
            .encoder
            .encode(spec, &body, stream_id, self.scheme, &self.authority)?;
        if withhold_last_byte {
            frames.clear_end_stream();
        }
        Ok(frames)
    }

    /// Like [`build`](Self::build), with the first HEADERS frame carrying
    /// the dependency of `link`
    pub fn build_dependent(
        &mut self,
        spec: &RequestSpec,
        link: &DependencyLink,
        withhold_last_byte: bool,
    ) -> Result<FrameSequence> {
        // Before encoding, so a rejected link leaves the HPACK state untouched
        link.validate()?;

        let mut frames = self.build(spec, link.stream_id, withhold_last_byte)?;
        match frames.headers_mut() {
            Some(headers) => headers.priority = Some(link.priority_spec()),
            None => {
                return Err(ConnectionError::Encode(format!(
                    "Stream {} has no HEADERS frame to annotate",
                    link.stream_id
                )))
            }
        }
        Ok(frames)
    }

    /// Withheld frames for `spec` and the completion frame releasing them
    pub fn build_withheld(
        &mut self,
        spec: &RequestSpec,
        stream_id: StreamId,
        link: Option<&DependencyLink>,
    ) -> Result<WithheldRequest> {
        let frames = match link {
            Some(link) if link.stream_id != stream_id => {
                return Err(ConnectionError::InvalidChain(format!(
                    "Link for stream {} used for stream {}",
                    link.stream_id, stream_id
                )))
            }
            Some(link) => self.build_dependent(spec, link, true)?,
            None => self.build(spec, stream_id, true)?,
        };

        let body = spec.body();
        let withheld = body.slice(body.len().saturating_sub(1)..);
        Ok(WithheldRequest {
            spec: spec.clone(),
            stream_id,
            link: link.copied(),
            frames,
            completion: CompletionFrame::new(stream_id, withheld),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::FrameType;

    fn assembler(encoder: &mut RequestEncoder) -> RequestAssembler<'_> {
        RequestAssembler::new(encoder, "https", "shop.test")
    }

    #[test]
    fn test_full_request_ends_once() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::builder("POST", "/cart").body("item=1").build();

        let frames = assembler.build(&spec, 1, false).unwrap();
        assert_eq!(frames.end_stream_count(), 1);
        assert_eq!(frames.body_len(), 6);
    }

    #[test]
    fn test_withheld_request_never_ends() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::builder("POST", "/cart").body("item=1").build();

        let frames = assembler.build(&spec, 3, true).unwrap();
        assert_eq!(frames.end_stream_count(), 0);
        assert_eq!(frames.body_len(), 5);
    }

    #[test]
    fn test_withheld_empty_body() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::new("GET", "/");

        let withheld = assembler.build_withheld(&spec, 5, None).unwrap();
        assert_eq!(withheld.frames.len(), 1);
        assert_eq!(withheld.frames.end_stream_count(), 0);
        assert!(withheld.completion.data().is_empty());
        assert!(withheld.completion.to_frame().is_end_stream());
    }

    #[test]
    fn test_withheld_single_byte_body() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::builder("POST", "/vote").body("1").build();

        let withheld = assembler.build_withheld(&spec, 7, None).unwrap();
        // Only HEADERS remains; the one body byte is the completion
        assert_eq!(withheld.frames.len(), 1);
        assert_eq!(withheld.frames.body_len(), 0);
        assert_eq!(withheld.completion.data().as_ref(), b"1");
    }

    #[test]
    fn test_completion_carries_last_byte() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::builder("POST", "/redeem").body("GETx").build();

        let withheld = assembler.build_withheld(&spec, 1, None).unwrap();
        let data: Vec<u8> = withheld
            .frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, b"GET");
        assert_eq!(withheld.completion.stream_id(), 1);
        assert_eq!(withheld.completion.data().as_ref(), b"x");
    }

    #[test]
    fn test_dependent_sets_priority_on_headers_only() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::builder("POST", "/long").body("abc").build();
        let link = DependencyLink::new(5, 3).with_weight(16);

        let frames = assembler.build_dependent(&spec, &link, false).unwrap();
        let headers = frames.headers().unwrap();
        assert_eq!(headers.priority, Some(PrioritySpec::new(3, false, 16)));
        assert!(frames.frames()[0].has_flag(crate::http::h2::frames::FrameFlags::PRIORITY));
        assert!(frames.frames()[1].is_type(FrameType::Data));
        assert_eq!(frames.end_stream_count(), 1);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::new("GET", "/");
        let link = DependencyLink::new(9, 9);

        match assembler.build_dependent(&spec, &link, true) {
            Err(ConnectionError::SelfDependency(9)) => {}
            other => panic!("expected self-dependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_link_stream_mismatch_rejected() {
        let mut encoder = RequestEncoder::new();
        let mut assembler = assembler(&mut encoder);
        let spec = RequestSpec::new("GET", "/");
        let link = DependencyLink::new(11, 1);

        assert!(matches!(
            assembler.build_withheld(&spec, 13, Some(&link)),
            Err(ConnectionError::InvalidChain(_))
        ));
    }
}
