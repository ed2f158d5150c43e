use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use netpipefs_transport::{LinkStream, PeerSession};
use netpipefs_wire::{MessageReader, MessageWriter, Mode};

/// The shared send half of the peer link.
///
/// Every frame emission takes the internal lock for exactly the duration of
/// one frame, so frames from different threads never interleave on the
/// stream. The receive half lives in the dispatcher and never contends here.
pub struct PeerLink {
    writer: Mutex<MessageWriter<LinkStream>>,
    remote_capacity: usize,
}

impl PeerLink {
    /// Wrap the send half of a connected stream.
    ///
    /// `remote_capacity` is the peer's advertised per-pipe buffer size: the
    /// credit baseline every pipe starts from.
    pub fn new(stream: LinkStream, remote_capacity: usize) -> Self {
        Self {
            writer: Mutex::new(MessageWriter::new(stream)),
            remote_capacity,
        }
    }

    /// Split an established session into the shared send half and the
    /// dispatcher's receive half.
    pub fn split(
        session: PeerSession,
    ) -> netpipefs_transport::Result<(Arc<Self>, MessageReader<LinkStream>)> {
        let reader_stream = session.stream.try_clone()?;
        let link = Arc::new(Self::new(session.stream, session.remote_capacity));
        Ok((link, MessageReader::new(reader_stream)))
    }

    /// The peer's advertised per-pipe buffer capacity.
    pub fn remote_capacity(&self) -> usize {
        self.remote_capacity
    }

    pub fn send_open(&self, path: &str, mode: Mode) -> netpipefs_wire::Result<()> {
        self.writer().send_open(path, mode)
    }

    pub fn send_close(&self, path: &str, mode: Mode) -> netpipefs_wire::Result<()> {
        self.writer().send_close(path, mode)
    }

    pub fn send_write(&self, path: &str, payload: &[u8]) -> netpipefs_wire::Result<usize> {
        self.writer().send_write(path, payload)
    }

    pub fn send_flush(&self, path: &str, head: &[u8], tail: &[u8]) -> netpipefs_wire::Result<usize> {
        self.writer().send_flush(path, head, tail)
    }

    pub fn send_read(&self, path: &str, len: usize) -> netpipefs_wire::Result<()> {
        self.writer().send_read(path, len)
    }

    pub fn send_read_request(&self, path: &str, len: usize) -> netpipefs_wire::Result<()> {
        self.writer().send_read_request(path, len)
    }

    fn writer(&self) -> MutexGuard<'_, MessageWriter<LinkStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote_capacity", &self.remote_capacity)
            .finish_non_exhaustive()
    }
}
