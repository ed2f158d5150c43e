//! Wire codec for the netpipefs peer protocol.
//!
//! Every message starts with a one-byte kind followed by length-prefixed
//! fields (little-endian). The send side emits one complete frame per call;
//! the receive side decodes only the header of data-bearing frames and
//! leaves the payload on the stream, so the engine can deliver those bytes
//! straight into waiting requests or the receive buffer without a staging
//! copy.

pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use error::{Result, WireError};
pub use message::{FrameHeader, Mode, WireConfig, DEFAULT_MAX_PAYLOAD, MAX_PATH_LEN};
pub use reader::MessageReader;
pub use writer::MessageWriter;
