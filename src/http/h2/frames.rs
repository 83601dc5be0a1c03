//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6 as typed
//! values, plus [`FrameSequence`], the ordered frames of one request.

use super::error::ErrorCode;
use super::settings::Settings;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;
use std::ops::BitOr;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags as a set of named bits
///
/// The meaning of a bit depends on the frame type (END_STREAM and ACK share
/// 0x1), so typed frames expose their flags as fields and this set is only
/// materialised at the wire boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// END_STREAM flag (0x1) - DATA, HEADERS
    pub const END_STREAM: FrameFlags = FrameFlags(0x1);
    /// ACK flag (0x1) - SETTINGS, PING
    pub const ACK: FrameFlags = FrameFlags(0x1);
    /// END_HEADERS flag (0x4) - HEADERS, PUSH_PROMISE, CONTINUATION
    pub const END_HEADERS: FrameFlags = FrameFlags(0x4);
    /// PADDED flag (0x8) - DATA, HEADERS, PUSH_PROMISE
    pub const PADDED: FrameFlags = FrameFlags(0x8);
    /// PRIORITY flag (0x20) - HEADERS
    pub const PRIORITY: FrameFlags = FrameFlags(0x20);

    pub const fn empty() -> Self {
        FrameFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: FrameFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FrameFlags) {
        self.0 &= !other.0;
    }

    /// Set or clear `other` depending on `on`
    pub fn set(&mut self, other: FrameFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// Stream dependency carried by PRIORITY and priority-bearing HEADERS frames
/// (RFC 7540 Section 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub stream_dependency: StreamId,
    pub exclusive: bool,
    /// Wire weight (0-255, effective weight is value + 1)
    pub weight: u8,
}

impl PrioritySpec {
    pub fn new(stream_dependency: StreamId, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
///
/// With `priority` set this is the priority-headers variant: the PRIORITY flag
/// is raised and the dependency is written ahead of the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<PrioritySpec>,
    pub padding: Option<u8>,
}

impl HeadersFrame {
    pub fn new(
        stream_id: StreamId,
        header_block: Bytes,
        end_stream: bool,
        end_headers: bool,
    ) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub priority: PrioritySpec,
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    /// Raw error code; see [`ErrorCode::from_u32`]
    pub error_code: u32,
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Empty SETTINGS frame with the ACK flag
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PUSH_PROMISE frame (RFC 7540 Section 6.6)
///
/// Push is disabled by the engine, so only the envelope is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    pub stream_id: StreamId,
    pub promised_stream_id: StreamId,
    pub header_block: Bytes,
    pub end_headers: bool,
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    pub data: [u8; 8],
}

impl PingFrame {
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    pub last_stream_id: StreamId,
    pub error_code: u32,
    pub debug_data: Bytes,
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: StreamId,
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id: StreamId,
    pub header_block: Bytes,
    pub end_headers: bool,
}

/// Frame of a type this engine does not interpret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrame {
    pub frame_type: u8,
    pub flags: FrameFlags,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

/// Any HTTP/2 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    Unknown(UnknownFrame),
}

impl Frame {
    /// Frame type, `None` for unknown types
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Frame::Data(_) => Some(FrameType::Data),
            Frame::Headers(_) => Some(FrameType::Headers),
            Frame::Priority(_) => Some(FrameType::Priority),
            Frame::RstStream(_) => Some(FrameType::RstStream),
            Frame::Settings(_) => Some(FrameType::Settings),
            Frame::PushPromise(_) => Some(FrameType::PushPromise),
            Frame::Ping(_) => Some(FrameType::Ping),
            Frame::Goaway(_) => Some(FrameType::Goaway),
            Frame::WindowUpdate(_) => Some(FrameType::WindowUpdate),
            Frame::Continuation(_) => Some(FrameType::Continuation),
            Frame::Unknown(_) => None,
        }
    }

    /// Is this frame of type `frame_type`?
    pub fn is_type(&self, frame_type: FrameType) -> bool {
        self.frame_type() == Some(frame_type)
    }

    pub fn name(&self) -> &'static str {
        self.frame_type().map(|t| t.name()).unwrap_or("UNKNOWN")
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::PushPromise(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
            Frame::Unknown(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::Goaway(_) => super::CONNECTION_STREAM_ID,
        }
    }

    /// Flag byte as it goes on the wire
    pub fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        match self {
            Frame::Data(f) => {
                flags.set(FrameFlags::END_STREAM, f.end_stream);
                flags.set(FrameFlags::PADDED, f.padding.is_some());
            }
            Frame::Headers(f) => {
                flags.set(FrameFlags::END_STREAM, f.end_stream);
                flags.set(FrameFlags::END_HEADERS, f.end_headers);
                flags.set(FrameFlags::PADDED, f.padding.is_some());
                flags.set(FrameFlags::PRIORITY, f.priority.is_some());
            }
            Frame::Settings(f) => flags.set(FrameFlags::ACK, f.ack),
            Frame::Ping(f) => flags.set(FrameFlags::ACK, f.ack),
            Frame::PushPromise(f) => flags.set(FrameFlags::END_HEADERS, f.end_headers),
            Frame::Continuation(f) => flags.set(FrameFlags::END_HEADERS, f.end_headers),
            Frame::Unknown(f) => flags = f.flags,
            Frame::Priority(_)
            | Frame::RstStream(_)
            | Frame::Goaway(_)
            | Frame::WindowUpdate(_) => {}
        }
        flags
    }

    /// Does this frame have `flag` set?
    pub fn has_flag(&self, flag: FrameFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Whether this frame closes the sender's side of its stream
    pub fn is_end_stream(&self) -> bool {
        match self {
            Frame::Data(f) => f.end_stream,
            Frame::Headers(f) => f.end_stream,
            _ => false,
        }
    }

    /// Whether this is a SETTINGS frame acknowledging the peer's settings
    pub fn is_settings_ack(&self) -> bool {
        matches!(self, Frame::Settings(f) if f.ack)
    }

    /// Remove END_STREAM; returns whether it was set
    pub fn clear_end_stream(&mut self) -> bool {
        let flag = match self {
            Frame::Data(f) => &mut f.end_stream,
            Frame::Headers(f) => &mut f.end_stream,
            Frame::Priority(_)
            | Frame::RstStream(_)
            | Frame::Settings(_)
            | Frame::PushPromise(_)
            | Frame::Ping(_)
            | Frame::Goaway(_)
            | Frame::WindowUpdate(_)
            | Frame::Continuation(_)
            | Frame::Unknown(_) => return false,
        };
        std::mem::replace(flag, false)
    }

    /// Body bytes carried by this frame (DATA payload without padding)
    pub fn body_len(&self) -> usize {
        match self {
            Frame::Data(f) => f.data.len(),
            _ => 0,
        }
    }

    /// Names of the flags set on this frame, interpreted for its type
    pub fn flag_names(&self) -> Vec<&'static str> {
        let flags = self.flags();
        let mut names = Vec::new();
        let ack_semantics = matches!(self, Frame::Settings(_) | Frame::Ping(_));
        if flags.contains(FrameFlags::END_STREAM) {
            names.push(if ack_semantics { "ACK" } else { "END_STREAM" });
        }
        if flags.contains(FrameFlags::END_HEADERS) {
            names.push("END_HEADERS");
        }
        if flags.contains(FrameFlags::PADDED) {
            names.push("PADDED");
        }
        if flags.contains(FrameFlags::PRIORITY) {
            names.push("PRIORITY");
        }
        names
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stream={} flags=[{}]",
            self.name(),
            self.stream_id(),
            self.flag_names().join("|")
        )?;
        match self {
            Frame::Data(d) => write!(f, " len={}", d.data.len()),
            Frame::Headers(h) => {
                write!(f, " block={}", h.header_block.len())?;
                if let Some(p) = h.priority {
                    write!(
                        f,
                        " depends_on={} weight={} exclusive={}",
                        p.stream_dependency, p.weight, p.exclusive
                    )?;
                }
                Ok(())
            }
            Frame::Priority(p) => write!(f, " depends_on={}", p.priority.stream_dependency),
            Frame::RstStream(r) => write!(f, " error={}", ErrorCode::describe(r.error_code)),
            Frame::Settings(s) => write!(f, " {}", s.settings),
            Frame::Goaway(g) => write!(
                f,
                " last_stream={} error={}",
                g.last_stream_id,
                ErrorCode::describe(g.error_code)
            ),
            Frame::WindowUpdate(w) => write!(f, " increment={}", w.size_increment),
            Frame::Continuation(c) => write!(f, " block={}", c.header_block.len()),
            Frame::Unknown(u) => write!(f, " type=0x{:x} len={}", u.frame_type, u.payload.len()),
            Frame::PushPromise(_) | Frame::Ping(_) => Ok(()),
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

impl From<HeadersFrame> for Frame {
    fn from(frame: HeadersFrame) -> Self {
        Frame::Headers(frame)
    }
}

impl From<SettingsFrame> for Frame {
    fn from(frame: SettingsFrame) -> Self {
        Frame::Settings(frame)
    }
}

impl From<WindowUpdateFrame> for Frame {
    fn from(frame: WindowUpdateFrame) -> Self {
        Frame::WindowUpdate(frame)
    }
}

/// Ordered frames of one logical request
///
/// The first frame is always HEADERS, optionally followed by CONTINUATION and
/// DATA frames. At most one frame carries END_STREAM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        FrameSequence { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Stream the sequence belongs to
    pub fn stream_id(&self) -> Option<StreamId> {
        self.frames.first().map(Frame::stream_id)
    }

    /// The leading HEADERS frame
    pub fn headers(&self) -> Option<&HeadersFrame> {
        match self.frames.first() {
            Some(Frame::Headers(h)) => Some(h),
            _ => None,
        }
    }

    pub fn headers_mut(&mut self) -> Option<&mut HeadersFrame> {
        match self.frames.first_mut() {
            Some(Frame::Headers(h)) => Some(h),
            _ => None,
        }
    }

    /// Number of frames carrying END_STREAM
    pub fn end_stream_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_end_stream()).count()
    }

    /// Total body bytes across all DATA frames
    pub fn body_len(&self) -> usize {
        self.frames.iter().map(Frame::body_len).sum()
    }

    /// Remove END_STREAM from every frame; returns how many had it
    pub fn clear_end_stream(&mut self) -> usize {
        self.frames
            .iter_mut()
            .map(Frame::clear_end_stream)
            .filter(|cleared| *cleared)
            .count()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl IntoIterator for FrameSequence {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}
