use std::io::{ErrorKind, Read};

use crate::error::{Result, WireError};
use crate::message::{
    FrameHeader, Mode, WireConfig, KIND_CLOSE, KIND_FLUSH, KIND_OPEN, KIND_READ,
    KIND_READ_REQUEST, KIND_WRITE,
};

/// Reads protocol frame headers from any `Read` stream.
///
/// Unlike a buffered frame reader, this never reads past the header of a
/// data-bearing frame: WRITE / FLUSH payload bytes stay on the stream so the
/// engine can deliver them in place. The reader therefore performs exact
/// reads only.
pub struct MessageReader<R> {
    inner: R,
    config: WireConfig,
}

impl<R: Read> MessageReader<R> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: R, config: WireConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next frame header (blocking).
    ///
    /// Returns `Err(WireError::ConnectionClosed)` when EOF is reached on a
    /// frame boundary or mid-frame.
    pub fn read_header(&mut self) -> Result<FrameHeader> {
        let kind = self.read_u8()?;
        let path = self.read_path()?;

        match kind {
            KIND_OPEN => {
                let mode = Mode::from_wire(self.read_u8()?)?;
                Ok(FrameHeader::Open { path, mode })
            }
            KIND_CLOSE => {
                let mode = Mode::from_wire(self.read_u8()?)?;
                Ok(FrameHeader::Close { path, mode })
            }
            KIND_WRITE => {
                let len = self.read_payload_len()?;
                Ok(FrameHeader::Write { path, len })
            }
            KIND_FLUSH => {
                let len = self.read_payload_len()?;
                Ok(FrameHeader::Flush { path, len })
            }
            KIND_READ => {
                let len = self.read_u32()? as usize;
                Ok(FrameHeader::Read { path, len })
            }
            KIND_READ_REQUEST => {
                let len = self.read_u32()? as usize;
                Ok(FrameHeader::ReadRequest { path, len })
            }
            other => Err(WireError::InvalidKind(other)),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying stream (to consume frame payloads).
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_path(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > self.config.max_path_len {
            return Err(WireError::PathTooLong {
                len,
                max: self.config.max_path_len,
            });
        }
        let mut bytes = vec![0u8; len];
        self.read_full(&mut bytes)?;
        Ok(String::from_utf8(bytes)?)
    }

    fn read_payload_len(&mut self) -> Result<usize> {
        let len = self.read_u32()? as usize;
        if len > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }
        Ok(len)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_full(&mut byte)?;
        Ok(byte[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_full(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        Ok(())
    }
}
