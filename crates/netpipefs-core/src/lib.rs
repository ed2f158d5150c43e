//! Per-file pipe engine for netpipefs.
//!
//! Each path open on a peer is backed by a [`Pipe`]: a ring buffer, a
//! remote-credit counter, FIFO queues of suspended requests, and three
//! condition variables. Local calls push bytes onto the wire under the
//! current credit or park; the [`Dispatcher`] on the other peer delivers
//! them to waiting readers or into the receive buffer and returns credit as
//! it drains.
//!
//! # Crate structure
//!
//! - [`ring`] — fixed-capacity byte FIFO with a transport-fill fast path
//! - [`registry`] — path → pipe mapping, one lock, last closer removes
//! - [`pipe`] — the engine: open/send/read/flush/close and their dispatcher
//!   counterparts
//! - [`dispatcher`] — the single thread owning the receive side
//! - [`fs`] — the mount-surface facade a filesystem shim calls into

pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod link;
pub mod pipe;
pub mod poll;
pub mod registry;
pub mod ring;

pub use dispatcher::Dispatcher;
pub use error::{PipeError, Result};
pub use fs::{FileAttr, FileKind, NetpipeFs, OpenMode};
pub use link::PeerLink;
pub use pipe::{Pipe, PipeStats};
pub use poll::{PollHandle, POLL_ERR, POLL_HUP, POLL_IN, POLL_OUT};
pub use registry::Registry;
pub use ring::RingBuffer;

pub use netpipefs_wire::Mode;
