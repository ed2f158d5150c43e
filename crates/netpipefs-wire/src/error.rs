/// Errors that can occur while encoding or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame starts with an unknown kind byte.
    #[error("unknown frame kind 0x{0:02x}")]
    InvalidKind(u8),

    /// A path field exceeds the configured maximum length.
    #[error("path too long ({len} bytes, max {max})")]
    PathTooLong { len: usize, max: usize },

    /// A path field is not valid UTF-8.
    #[error("path is not valid UTF-8")]
    InvalidPath(#[from] std::string::FromUtf8Error),

    /// A payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly between frames, or mid-frame.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, WireError>;
