use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use netpipefs_transport::LinkStream;
use netpipefs_wire::{FrameHeader, MessageReader, WireError};

use crate::error::{PipeError, Result};
use crate::registry::Registry;

/// The single thread that owns the receive side of the peer link.
///
/// It decodes one frame at a time and hands it to the engine method for the
/// frame's path. It never waits on a user condition variable; WRITE / FLUSH
/// payloads are delivered under the pipe lock straight off the stream. Any
/// receive failure — including a clean EOF — triggers `force_exit` on every
/// tracked pipe before the thread exits.
pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
    stream: LinkStream,
}

impl Dispatcher {
    /// Start the dispatcher thread on the receive half of the link.
    pub fn spawn(
        reader: MessageReader<LinkStream>,
        registry: Arc<Registry>,
    ) -> netpipefs_transport::Result<Self> {
        let stream = reader.get_ref().try_clone()?;
        let handle = std::thread::Builder::new()
            .name("netpipefs-dispatcher".to_string())
            .spawn(move || run(reader, registry))
            .map_err(netpipefs_transport::TransportError::Io)?;

        Ok(Self {
            handle: Some(handle),
            stream,
        })
    }

    /// Shut the link down so the blocked receive unblocks and the thread
    /// winds down through its teardown path.
    pub fn stop(&self) {
        let _ = self.stream.shutdown();
    }

    /// Wait for the dispatcher thread to exit.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
        self.join_inner();
    }
}

fn run(mut reader: MessageReader<LinkStream>, registry: Arc<Registry>) {
    loop {
        let header = match reader.read_header() {
            Ok(header) => header,
            Err(WireError::ConnectionClosed) => {
                info!("peer disconnected");
                break;
            }
            Err(err) => {
                warn!(error = %err, "receive failed");
                break;
            }
        };

        if let Err(err) = dispatch(&mut reader, &registry, header) {
            warn!(error = %err, "frame dispatch failed");
            break;
        }
    }

    registry.force_exit_all();
    debug!("dispatcher exiting");
}

fn dispatch(
    reader: &mut MessageReader<LinkStream>,
    registry: &Registry,
    header: FrameHeader,
) -> Result<()> {
    match header {
        FrameHeader::Open { path, mode } => {
            registry.open_update(&path, mode);
            Ok(())
        }
        FrameHeader::Close { path, mode } => {
            // lookup miss: the pipe is already gone locally, nothing to do
            if let Some(pipe) = registry.get(&path) {
                pipe.close_update(registry, mode);
            }
            Ok(())
        }
        FrameHeader::Write { path, len } | FrameHeader::Flush { path, len } => {
            match registry.get(&path) {
                Some(pipe) => pipe.recv(len, reader.get_mut()),
                None => {
                    debug!(%path, len, "payload for an untracked pipe, discarding");
                    discard(reader.get_mut(), len)
                }
            }
        }
        FrameHeader::Read { path, len } => match registry.get(&path) {
            Some(pipe) => pipe.read_update(len),
            None => Ok(()),
        },
        FrameHeader::ReadRequest { path, len } => match registry.get(&path) {
            Some(pipe) => pipe.read_request(len),
            None => Ok(()),
        },
    }
}

fn discard<R: Read>(stream: &mut R, len: usize) -> Result<()> {
    let copied = std::io::copy(&mut stream.take(len as u64), &mut std::io::sink())
        .map_err(|_| PipeError::ConnectionReset)?;
    if copied as usize != len {
        return Err(PipeError::ConnectionReset);
    }
    Ok(())
}
