//! Peer link establishment for netpipefs.
//!
//! Two symmetric peers each listen on a local port and connect to the other;
//! the two resulting connections are collapsed into one by a deterministic
//! endpoint comparison, and the survivor carries a JSON hello exchanging each
//! side's pipe capacity. Everything above this crate sees a single connected
//! [`LinkStream`].

pub mod error;
pub mod handshake;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use handshake::{Hello, PROTOCOL_NAME, PROTOCOL_VERSION};
pub use stream::LinkStream;
pub use tcp::{establish, LinkConfig, PeerSession};
