use std::sync::Arc;

use netpipefs_wire::Mode;

use crate::error::{PipeError, Result};
use crate::pipe::Pipe;
use crate::poll::PollHandle;
use crate::registry::Registry;

/// What a path looks like to `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Pipe,
}

/// Minimal attribute set the mount surface reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
}

/// Access mode requested through the mount surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn to_engine(self) -> Result<Mode> {
        match self {
            OpenMode::Read => Ok(Mode::Read),
            OpenMode::Write => Ok(Mode::Write),
            // duplex access on a single handle is not supported
            OpenMode::ReadWrite => Err(PipeError::InvalidArgument),
        }
    }
}

/// The upcall surface a filesystem shim translates into engine calls.
///
/// Every used path appears as a read-only regular file; writability is
/// enforced by open's mode policy, not by `getattr`. There is no persisted
/// state: pipes live only for the duration of a mount.
pub struct NetpipeFs {
    registry: Arc<Registry>,
}

impl NetpipeFs {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry backing this mount.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn getattr(&self, path: &str) -> FileAttr {
        if path == "/" {
            FileAttr {
                kind: FileKind::Directory,
                perm: 0o755,
                nlink: 2,
            }
        } else {
            FileAttr {
                kind: FileKind::Pipe,
                perm: 0o444,
                nlink: 1,
            }
        }
    }

    /// Only the two standard entries; pipes are not enumerable.
    pub fn readdir(&self) -> Vec<&'static str> {
        vec![".", ".."]
    }

    /// Pipes have no size to change.
    pub fn truncate(&self, _path: &str, _size: u64) -> Result<()> {
        Ok(())
    }

    pub fn open(&self, path: &str, mode: OpenMode, nonblock: bool) -> Result<Arc<Pipe>> {
        let mode = mode.to_engine()?;
        self.registry.open(path, mode, nonblock)
    }

    pub fn read(&self, pipe: &Pipe, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        pipe.read(buf, nonblock)
    }

    pub fn write(&self, pipe: &Pipe, buf: &[u8], nonblock: bool) -> Result<usize> {
        pipe.send(buf, nonblock)
    }

    pub fn release(&self, pipe: &Pipe, mode: OpenMode) -> Result<usize> {
        let mode = mode.to_engine()?;
        pipe.close(&self.registry, mode)
    }

    pub fn poll(&self, pipe: &Pipe, handle: PollHandle) -> u16 {
        pipe.poll(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use netpipefs_transport::LinkStream;

    use super::*;
    use crate::link::PeerLink;

    fn mount() -> (NetpipeFs, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let link = Arc::new(PeerLink::new(LinkStream::from_unix(ours), 64));
        let registry = Arc::new(Registry::new(link, 64));
        (NetpipeFs::new(registry), theirs)
    }

    #[test]
    fn getattr_shapes() {
        let (fs, _peer) = mount();

        let root = fs.getattr("/");
        assert_eq!(root.kind, FileKind::Directory);
        assert_eq!(root.perm, 0o755);
        assert_eq!(root.nlink, 2);

        let pipe = fs.getattr("/anything");
        assert_eq!(pipe.kind, FileKind::Pipe);
        assert_eq!(pipe.perm, 0o444);
        assert_eq!(pipe.nlink, 1);
    }

    #[test]
    fn readdir_lists_only_dot_entries() {
        let (fs, _peer) = mount();
        assert_eq!(fs.readdir(), vec![".", ".."]);
    }

    #[test]
    fn truncate_is_a_noop() {
        let (fs, _peer) = mount();
        assert!(fs.truncate("/x", 42).is_ok());
    }

    #[test]
    fn read_write_open_is_rejected() {
        let (fs, _peer) = mount();
        let err = fs.open("/x", OpenMode::ReadWrite, false).unwrap_err();
        assert_eq!(err, PipeError::InvalidArgument);
        assert!(fs.registry().is_empty());
    }

    #[test]
    fn write_open_then_release() {
        let (fs, _peer) = mount();
        let pipe = fs.open("/x", OpenMode::Write, false).unwrap();
        assert_eq!(fs.write(&pipe, b"abc", false).unwrap(), 3);
        fs.release(&pipe, OpenMode::Write).unwrap();
        assert!(fs.registry().is_empty());
    }
}
