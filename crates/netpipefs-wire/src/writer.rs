use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::message::{
    Mode, WireConfig, KIND_CLOSE, KIND_FLUSH, KIND_OPEN, KIND_READ, KIND_READ_REQUEST, KIND_WRITE,
};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete protocol frames to any `Write` stream.
///
/// One call emits one frame; callers serialize access so frames never
/// interleave on the shared stream.
pub struct MessageWriter<W> {
    inner: W,
    buf: BytesMut,
    config: WireConfig,
}

impl<W: Write> MessageWriter<W> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: W, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Emit an OPEN frame.
    pub fn send_open(&mut self, path: &str, mode: Mode) -> Result<()> {
        self.encode_header(KIND_OPEN, path)?;
        self.buf.put_u8(mode.to_wire());
        self.write_out()
    }

    /// Emit a CLOSE frame.
    pub fn send_close(&mut self, path: &str, mode: Mode) -> Result<()> {
        self.encode_header(KIND_CLOSE, path)?;
        self.buf.put_u8(mode.to_wire());
        self.write_out()
    }

    /// Emit a WRITE frame carrying `payload`. Returns the payload length.
    pub fn send_write(&mut self, path: &str, payload: &[u8]) -> Result<usize> {
        self.check_payload(payload.len())?;
        self.encode_header(KIND_WRITE, path)?;
        self.buf.put_u32_le(payload.len() as u32);
        self.buf.put_slice(payload);
        self.write_out()?;
        Ok(payload.len())
    }

    /// Emit a FLUSH frame whose payload is the concatenation of `head` and
    /// `tail` (the two contiguous regions of a wrapped ring buffer).
    pub fn send_flush(&mut self, path: &str, head: &[u8], tail: &[u8]) -> Result<usize> {
        let len = head.len() + tail.len();
        self.check_payload(len)?;
        self.encode_header(KIND_FLUSH, path)?;
        self.buf.put_u32_le(len as u32);
        self.buf.put_slice(head);
        self.buf.put_slice(tail);
        self.write_out()?;
        Ok(len)
    }

    /// Emit a READ frame: `len` bytes were consumed from the local buffer.
    pub fn send_read(&mut self, path: &str, len: usize) -> Result<()> {
        self.encode_header(KIND_READ, path)?;
        self.buf.put_u32_le(len as u32);
        self.write_out()
    }

    /// Emit a READ-REQUEST frame: willing to accept `len` more bytes.
    pub fn send_read_request(&mut self, path: &str, len: usize) -> Result<()> {
        self.encode_header(KIND_READ_REQUEST, path)?;
        self.buf.put_u32_le(len as u32);
        self.write_out()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check_payload(&self, len: usize) -> Result<()> {
        if len > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    fn encode_header(&mut self, kind: u8, path: &str) -> Result<()> {
        if path.len() > self.config.max_path_len {
            return Err(WireError::PathTooLong {
                len: path.len(),
                max: self.config.max_path_len,
            });
        }
        self.buf.clear();
        self.buf.put_u8(kind);
        self.buf.put_u32_le(path.len() as u32);
        self.buf.put_slice(path.as_bytes());
        Ok(())
    }

    fn write_out(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }
}
