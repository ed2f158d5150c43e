use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Expected protocol name.
pub const PROTOCOL_NAME: &str = "netpipefs";

/// Local protocol version.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_HELLO_PAYLOAD: usize = 16 * 1024;

/// Hello sent by each side once the link is chosen.
///
/// `pipe_capacity` is the number of bytes this side will buffer per pipe; it
/// becomes the peer's credit baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Protocol name. Must be `netpipefs`.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// Per-pipe receive buffer capacity in bytes.
    pub pipe_capacity: usize,
}

impl Hello {
    /// The hello this side advertises.
    pub fn local(pipe_capacity: usize) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            pipe_capacity,
        }
    }
}

/// Exchange hellos over the chosen link and validate the peer's.
///
/// Both sides send first and read second; the hello is small enough to sit
/// in the socket buffer, so the symmetric order cannot deadlock.
pub fn exchange<S: Read + Write>(stream: &mut S, pipe_capacity: usize) -> Result<Hello> {
    if pipe_capacity == 0 {
        return Err(TransportError::HandshakeFailed(
            "pipe capacity must be greater than zero".to_string(),
        ));
    }

    send_hello(stream, &Hello::local(pipe_capacity))?;
    let peer = recv_hello(stream)?;
    validate_hello(&peer)?;
    Ok(peer)
}

fn send_hello<W: Write>(stream: &mut W, hello: &Hello) -> Result<()> {
    let payload = serde_json::to_vec(hello)?;
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

fn recv_hello<R: Read>(stream: &mut R) -> Result<Hello> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_HELLO_PAYLOAD {
        return Err(TransportError::HandshakeFailed(format!(
            "hello payload too large: {len} (max {MAX_HELLO_PAYLOAD})"
        )));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

fn validate_hello(hello: &Hello) -> Result<()> {
    if hello.protocol != PROTOCOL_NAME {
        return Err(TransportError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            hello.protocol, PROTOCOL_NAME
        )));
    }

    if !is_version_compatible(&hello.version, PROTOCOL_VERSION)? {
        return Err(TransportError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            hello.version, PROTOCOL_VERSION
        )));
    }

    if hello.pipe_capacity == 0 {
        return Err(TransportError::HandshakeFailed(
            "peer advertised a zero pipe capacity".to_string(),
        ));
    }

    Ok(())
}

fn is_version_compatible(peer_version: &str, local_version: &str) -> Result<bool> {
    let (peer_major, _) = parse_version(peer_version)?;
    let (local_major, _) = parse_version(local_version)?;
    Ok(peer_major == local_major)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let mut parts = version.split('.');

    let major = parts.next().ok_or_else(|| {
        TransportError::HandshakeFailed(format!("invalid version '{version}': missing major"))
    })?;
    let minor = parts.next().ok_or_else(|| {
        TransportError::HandshakeFailed(format!("invalid version '{version}': missing minor"))
    })?;

    if parts.next().is_some() {
        return Err(TransportError::HandshakeFailed(format!(
            "invalid version '{version}': expected '<major>.<minor>'"
        )));
    }

    let major = major.parse::<u16>().map_err(|_| {
        TransportError::HandshakeFailed(format!("invalid version '{version}': non-numeric major"))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        TransportError::HandshakeFailed(format!("invalid version '{version}': non-numeric minor"))
    })?;

    Ok((major, minor))
}
