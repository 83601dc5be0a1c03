//! HTTP/2 settings management
//!
//! SETTINGS parameters as defined in RFC 7540 Section 6.5, the payload layout
//! used on the wire, and the settings the race engine advertises.

use super::error::{ConnectionError, DecodeError, Result};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Size of one setting on the wire (2 byte id + 4 byte value)
pub const SETTING_SIZE: usize = 6;

/// Largest legal SETTINGS_INITIAL_WINDOW_SIZE (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    HeaderTableSize = 0x1,
    /// SETTINGS_ENABLE_PUSH (0x2)
    EnablePush = 0x2,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    MaxConcurrentStreams = 0x3,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    InitialWindowSize = 0x4,
    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    MaxFrameSize = 0x5,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    MaxHeaderListSize = 0x6,
    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x8) - RFC 8441
    EnableConnectProtocol = 0x8,
    /// SETTINGS_NO_RFC7540_PRIORITIES (0x9) - RFC 9218
    ///
    /// A peer advertising this ignores stream dependencies, which defeats
    /// dependency chains.
    NoRfc7540Priorities = 0x9,
}

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            0x8 => Some(SettingsParameter::EnableConnectProtocol),
            0x9 => Some(SettingsParameter::NoRfc7540Priorities),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
            SettingsParameter::EnableConnectProtocol => "ENABLE_CONNECT_PROTOCOL",
            SettingsParameter::NoRfc7540Priorities => "NO_RFC7540_PRIORITIES",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// `None` means "not advertised"; the protocol default applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
    pub enable_connect_protocol: Option<bool>,
    pub no_rfc7540_priorities: Option<bool>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    /// Settings advertised before a race
    ///
    /// Push is disabled, the stream window is as large as the protocol allows
    /// and many concurrent streams are accepted.
    pub fn race_defaults() -> Self {
        Settings {
            enable_push: Some(false),
            initial_window_size: Some(MAX_WINDOW_SIZE),
            max_concurrent_streams: Some(1000),
            ..Settings::default()
        }
    }

    /// Get max frame size (with default)
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(super::DEFAULT_MAX_FRAME_SIZE)
    }

    /// Get initial window size (with default)
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size
            .unwrap_or(super::DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Get max concurrent streams (None = unlimited)
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Whether the peer opted out of RFC 7540 stream priorities
    pub fn get_no_rfc7540_priorities(&self) -> bool {
        self.no_rfc7540_priorities.unwrap_or(false)
    }

    /// Number of parameters that will be put on the wire
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > MAX_WINDOW_SIZE {
                return Err(ConnectionError::InvalidSettings(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        if let Some(max_frame_size) = self.max_frame_size {
            if !(16384..=16777215).contains(&max_frame_size) {
                return Err(ConnectionError::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Merge settings from another Settings object
    /// (values in `other` override values in `self`)
    pub fn merge(&mut self, other: &Settings) {
        for (param, value) in other.entries() {
            self.apply(param, value);
        }
    }

    /// Advertised parameters in wire order
    pub fn entries(&self) -> Vec<(SettingsParameter, u32)> {
        let flag = |b: bool| if b { 1 } else { 0 };
        let mut entries = Vec::new();
        if let Some(v) = self.header_table_size {
            entries.push((SettingsParameter::HeaderTableSize, v));
        }
        if let Some(v) = self.enable_push {
            entries.push((SettingsParameter::EnablePush, flag(v)));
        }
        if let Some(v) = self.max_concurrent_streams {
            entries.push((SettingsParameter::MaxConcurrentStreams, v));
        }
        if let Some(v) = self.initial_window_size {
            entries.push((SettingsParameter::InitialWindowSize, v));
        }
        if let Some(v) = self.max_frame_size {
            entries.push((SettingsParameter::MaxFrameSize, v));
        }
        if let Some(v) = self.max_header_list_size {
            entries.push((SettingsParameter::MaxHeaderListSize, v));
        }
        if let Some(v) = self.enable_connect_protocol {
            entries.push((SettingsParameter::EnableConnectProtocol, flag(v)));
        }
        if let Some(v) = self.no_rfc7540_priorities {
            entries.push((SettingsParameter::NoRfc7540Priorities, flag(v)));
        }
        entries
    }

    fn apply(&mut self, param: SettingsParameter, value: u32) {
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = Some(value),
            SettingsParameter::EnablePush => self.enable_push = Some(value != 0),
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingsParameter::InitialWindowSize => self.initial_window_size = Some(value),
            SettingsParameter::MaxFrameSize => self.max_frame_size = Some(value),
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = Some(value),
            SettingsParameter::EnableConnectProtocol => {
                self.enable_connect_protocol = Some(value != 0)
            }
            SettingsParameter::NoRfc7540Priorities => self.no_rfc7540_priorities = Some(value != 0),
        }
    }

    /// Write the SETTINGS payload
    pub fn encode_into(&self, buf: &mut BytesMut) {
        for (param, value) in self.entries() {
            buf.put_u16(param.as_u16());
            buf.put_u32(value);
        }
    }

    /// Parse a SETTINGS payload
    ///
    /// Unknown identifiers are ignored per RFC 7540 Section 6.5.2.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, DecodeError> {
        if payload.len() % SETTING_SIZE != 0 {
            return Err(DecodeError::InvalidPayload {
                frame_type: "SETTINGS",
                len: payload.len(),
                reason: "length is not a multiple of 6",
            });
        }

        let mut settings = Settings::new();
        for chunk in payload.chunks_exact(SETTING_SIZE) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            if let Some(param) = SettingsParameter::from_u16(id) {
                settings.apply(param, value);
            }
        }
        Ok(settings)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries();
        if entries.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        for (i, (param, value)) in entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", param.name(), value)?;
        }
        write!(f, "}}")
    }
}

/// Builder for HTTP/2 settings
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
