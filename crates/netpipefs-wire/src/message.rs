use crate::error::{Result, WireError};

/// Maximum length of a path field on the wire.
pub const MAX_PATH_LEN: usize = 4096;

/// Default maximum payload size for WRITE / FLUSH frames: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

pub(crate) const KIND_OPEN: u8 = 0x01;
pub(crate) const KIND_CLOSE: u8 = 0x02;
pub(crate) const KIND_WRITE: u8 = 0x03;
pub(crate) const KIND_FLUSH: u8 = 0x04;
pub(crate) const KIND_READ: u8 = 0x05;
pub(crate) const KIND_READ_REQUEST: u8 = 0x06;

/// Access mode of a pipe handle, as carried by OPEN and CLOSE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            Mode::Read => 0,
            Mode::Write => 1,
        }
    }

    pub(crate) fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Mode::Read),
            1 => Ok(Mode::Write),
            other => Err(WireError::InvalidKind(other)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Read => write!(f, "read"),
            Mode::Write => write!(f, "write"),
        }
    }
}

/// A decoded frame header.
///
/// `Write` and `Flush` carry `len` payload bytes which are *not* consumed by
/// header decoding; they remain on the stream for the caller to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHeader {
    /// Peer opened `path` in `mode`.
    Open { path: String, mode: Mode },
    /// Peer closed one handle of `path` in `mode`.
    Close { path: String, mode: Mode },
    /// Peer sends `len` payload bytes for `path`.
    Write { path: String, len: usize },
    /// Same as `Write`; emitted when the sender drains its own buffer.
    Flush { path: String, len: usize },
    /// Peer consumed `len` bytes from its receive buffer (credit return).
    Read { path: String, len: usize },
    /// Peer will accept `len` more bytes (credit grant).
    ReadRequest { path: String, len: usize },
}

impl FrameHeader {
    /// The path this frame addresses.
    pub fn path(&self) -> &str {
        match self {
            FrameHeader::Open { path, .. }
            | FrameHeader::Close { path, .. }
            | FrameHeader::Write { path, .. }
            | FrameHeader::Flush { path, .. }
            | FrameHeader::Read { path, .. }
            | FrameHeader::ReadRequest { path, .. } => path,
        }
    }
}

/// Configuration for the wire codec.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum payload size accepted on WRITE / FLUSH frames.
    pub max_payload_size: usize,
    /// Maximum path field length.
    pub max_path_len: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_path_len: MAX_PATH_LEN,
        }
    }
}
