//! HTTP/2 frame encoding and decoding
//!
//! This module provides low-level frame encoding/decoding with full control
//! over frame construction. Frames are encoded exactly as built: the codec never
//! adds or removes flags on its own, which is what lets the race layer strip
//! END_STREAM and splice priority fields.

use super::error::DecodeError;
use super::frames::*;
use super::settings::Settings;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Size of the stream dependency + weight field
pub const PRIORITY_FIELD_SIZE: usize = 5;

const EXCLUSIVE_BIT: u32 = 0x8000_0000;
const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Frame header as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    /// Raw type byte; unknown types are preserved
    pub frame_type: u8,
    pub flags: FrameFlags,
    pub stream_id: u32,
}

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header into a buffer
    pub fn encode_header(
        frame_type: u8,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type;
        header[4] = flags.bits();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & STREAM_ID_MASK;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header from bytes
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & STREAM_ID_MASK;

        FrameHeader {
            length,
            frame_type: bytes[3],
            flags: FrameFlags::from_bits(bytes[4]),
            stream_id,
        }
    }

    /// Encode a single frame
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(frame, &mut buf);
        buf.freeze()
    }

    /// Encode frames back to back into one buffer, preserving order
    pub fn encode_all<'a, I>(frames: I) -> Bytes
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let mut buf = BytesMut::new();
        for frame in frames {
            Self::encode_into(frame, &mut buf);
        }
        buf.freeze()
    }

    /// Append the wire form of `frame` to `buf`
    pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        let frame_type = match frame {
            Frame::Unknown(u) => u.frame_type,
            // every other variant has a type
            _ => frame.frame_type().map(FrameType::as_u8).unwrap_or_default(),
        };

        match frame {
            Frame::Data(f) => {
                if let Some(pad_len) = f.padding {
                    payload.put_u8(pad_len);
                }
                payload.put_slice(&f.data);
                if let Some(pad_len) = f.padding {
                    payload.put_bytes(0, pad_len as usize);
                }
            }
            Frame::Headers(f) => {
                if let Some(pad_len) = f.padding {
                    payload.put_u8(pad_len);
                }
                if let Some(priority) = &f.priority {
                    Self::put_priority(&mut payload, priority);
                }
                payload.put_slice(&f.header_block);
                if let Some(pad_len) = f.padding {
                    payload.put_bytes(0, pad_len as usize);
                }
            }
            Frame::Priority(f) => Self::put_priority(&mut payload, &f.priority),
            Frame::RstStream(f) => payload.put_u32(f.error_code),
            Frame::Settings(f) => {
                // An ACK carries no payload
                if !f.ack {
                    f.settings.encode_into(&mut payload);
                }
            }
            Frame::PushPromise(f) => {
                payload.put_u32(f.promised_stream_id & STREAM_ID_MASK);
                payload.put_slice(&f.header_block);
            }
            Frame::Ping(f) => payload.put_slice(&f.data),
            Frame::Goaway(f) => {
                payload.put_u32(f.last_stream_id & STREAM_ID_MASK);
                payload.put_u32(f.error_code);
                payload.put_slice(&f.debug_data);
            }
            Frame::WindowUpdate(f) => payload.put_u32(f.size_increment & STREAM_ID_MASK),
            Frame::Continuation(f) => payload.put_slice(&f.header_block),
            Frame::Unknown(f) => payload.put_slice(&f.payload),
        }

        let header =
            Self::encode_header(frame_type, frame.flags(), frame.stream_id(), payload.len());
        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&header);
        buf.put_slice(&payload);
    }

    fn put_priority(buf: &mut BytesMut, priority: &PrioritySpec) {
        let mut dep = priority.stream_dependency & STREAM_ID_MASK;
        if priority.exclusive {
            dep |= EXCLUSIVE_BIT;
        }
        buf.put_u32(dep);
        buf.put_u8(priority.weight);
    }

    fn get_priority(buf: &mut Bytes) -> PrioritySpec {
        let dep = buf.get_u32();
        let weight = buf.get_u8();
        PrioritySpec {
            stream_dependency: dep & STREAM_ID_MASK,
            exclusive: dep & EXCLUSIVE_BIT != 0,
            weight,
        }
    }

    /// Remove the padding of a PADDED payload, returning the remaining content
    fn strip_padding(
        frame_type: &'static str,
        flags: FrameFlags,
        mut payload: Bytes,
    ) -> DecodeResult<(Bytes, Option<u8>)> {
        if !flags.contains(FrameFlags::PADDED) {
            return Ok((payload, None));
        }
        if payload.is_empty() {
            return Err(DecodeError::InvalidPayload {
                frame_type,
                len: 0,
                reason: "missing pad length",
            });
        }
        let len = payload.len();
        let pad_len = payload.get_u8();
        if pad_len as usize > payload.len() {
            return Err(DecodeError::InvalidPayload {
                frame_type,
                len,
                reason: "padding exceeds payload",
            });
        }
        payload.truncate(payload.len() - pad_len as usize);
        Ok((payload, Some(pad_len)))
    }

    fn expect_len(frame_type: &'static str, payload: &Bytes, expected: usize) -> DecodeResult<()> {
        if payload.len() != expected {
            return Err(DecodeError::InvalidPayload {
                frame_type,
                len: payload.len(),
                reason: "unexpected payload length",
            });
        }
        Ok(())
    }

    /// Build a typed frame from its header and complete payload
    pub fn decode(header: &FrameHeader, payload: Bytes) -> DecodeResult<Frame> {
        let flags = header.flags;
        let stream_id = header.stream_id;

        let frame_type = match FrameType::from_u8(header.frame_type) {
            Some(t) => t,
            None => {
                return Ok(Frame::Unknown(UnknownFrame {
                    frame_type: header.frame_type,
                    flags,
                    stream_id,
                    payload,
                }))
            }
        };

        let frame = match frame_type {
            FrameType::Data => {
                let (data, padding) = Self::strip_padding("DATA", flags, payload)?;
                Frame::Data(DataFrame {
                    stream_id,
                    data,
                    end_stream: flags.contains(FrameFlags::END_STREAM),
                    padding,
                })
            }
            FrameType::Headers => {
                let (mut block, padding) = Self::strip_padding("HEADERS", flags, payload)?;
                let priority = if flags.contains(FrameFlags::PRIORITY) {
                    if block.len() < PRIORITY_FIELD_SIZE {
                        return Err(DecodeError::InvalidPayload {
                            frame_type: "HEADERS",
                            len: block.len(),
                            reason: "truncated priority field",
                        });
                    }
                    Some(Self::get_priority(&mut block))
                } else {
                    None
                };
                Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: block,
                    end_stream: flags.contains(FrameFlags::END_STREAM),
                    end_headers: flags.contains(FrameFlags::END_HEADERS),
                    priority,
                    padding,
                })
            }
            FrameType::Priority => {
                Self::expect_len("PRIORITY", &payload, PRIORITY_FIELD_SIZE)?;
                let mut payload = payload;
                Frame::Priority(PriorityFrame {
                    stream_id,
                    priority: Self::get_priority(&mut payload),
                })
            }
            FrameType::RstStream => {
                Self::expect_len("RST_STREAM", &payload, 4)?;
                let mut payload = payload;
                Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: payload.get_u32(),
                })
            }
            FrameType::Settings => {
                let ack = flags.contains(FrameFlags::ACK);
                if ack && !payload.is_empty() {
                    return Err(DecodeError::InvalidPayload {
                        frame_type: "SETTINGS",
                        len: payload.len(),
                        reason: "ACK with payload",
                    });
                }
                Frame::Settings(SettingsFrame {
                    ack,
                    settings: Settings::decode(&payload)?,
                })
            }
            FrameType::PushPromise => {
                let (mut block, _) = Self::strip_padding("PUSH_PROMISE", flags, payload)?;
                if block.len() < 4 {
                    return Err(DecodeError::InvalidPayload {
                        frame_type: "PUSH_PROMISE",
                        len: block.len(),
                        reason: "missing promised stream id",
                    });
                }
                let promised_stream_id = block.get_u32() & STREAM_ID_MASK;
                Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: block,
                    end_headers: flags.contains(FrameFlags::END_HEADERS),
                })
            }
            FrameType::Ping => {
                Self::expect_len("PING", &payload, 8)?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Frame::Ping(PingFrame {
                    ack: flags.contains(FrameFlags::ACK),
                    data,
                })
            }
            FrameType::Goaway => {
                if payload.len() < 8 {
                    return Err(DecodeError::InvalidPayload {
                        frame_type: "GOAWAY",
                        len: payload.len(),
                        reason: "shorter than 8 bytes",
                    });
                }
                let mut payload = payload;
                let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
                let error_code = payload.get_u32();
                Frame::Goaway(GoawayFrame {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            FrameType::WindowUpdate => {
                Self::expect_len("WINDOW_UPDATE", &payload, 4)?;
                let mut payload = payload;
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id,
                    size_increment: payload.get_u32() & STREAM_ID_MASK,
                })
            }
            FrameType::Continuation => Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: payload,
                end_headers: flags.contains(FrameFlags::END_HEADERS),
            }),
        };

        Ok(frame)
    }
}

/// Incremental frame decoder
///
/// Bytes are fed as they arrive; complete frames are handed out one at a time
/// and a partial frame stays buffered until the rest shows up. Whenever an
/// error is returned the offending bytes have already been consumed.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Decoder rejecting payloads longer than `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Append received bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed
    pub fn next_frame(&mut self) -> DecodeResult<Option<Frame>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
        let header = FrameCodec::decode_header(&raw);

        if header.length > self.max_frame_size {
            // Frame boundaries are lost; resynchronising is not possible
            self.buffer.clear();
            return Err(DecodeError::FrameTooLarge(header.length));
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + header.length {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.buffer.split_to(header.length).freeze();
        FrameCodec::decode(&header, payload).map(Some)
    }

    /// Decode every complete frame currently buffered
    ///
    /// Errors are collected next to the frames instead of aborting the batch.
    pub fn decode_available(&mut self) -> (Vec<Frame>, Vec<DecodeError>) {
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => errors.push(e),
            }
        }
        (frames, errors)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
