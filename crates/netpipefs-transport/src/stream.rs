use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// A connected peer link stream — implements `Read` + `Write`.
///
/// Production links are TCP; the Unix-socket variant exists so two in-process
/// peers can be wired together through `UnixStream::pair` in tests and local
/// harnesses.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
        }
    }

    /// Wrap one end of a Unix socket pair.
    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            LinkStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both halves of the stream, unblocking any reader.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.shutdown(std::net::Shutdown::Both)?,
            LinkStreamInner::Unix(stream) => stream.shutdown(std::net::Shutdown::Both)?,
        }
        Ok(())
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout)?,
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout)?,
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout)?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            LinkStreamInner::Tcp(_) => f.debug_struct("LinkStream").field("type", &"tcp").finish(),
            LinkStreamInner::Unix(_) => {
                f.debug_struct("LinkStream").field("type", &"unix").finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_pair_roundtrip() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut a = LinkStream::from_unix(left);
        let mut b = LinkStream::from_unix(right);

        a.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn shutdown_unblocks_reader() {
        let (left, right) = UnixStream::pair().unwrap();
        let a = LinkStream::from_unix(left);
        let mut b = LinkStream::from_unix(right);

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            b.read(&mut buf).unwrap()
        });

        a.shutdown().unwrap();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn try_clone_shares_the_connection() {
        let (left, right) = UnixStream::pair().unwrap();
        let a = LinkStream::from_unix(left);
        let mut a_clone = a.try_clone().unwrap();
        let mut b = LinkStream::from_unix(right);

        a_clone.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }
}
