use std::time::Duration;

/// Errors that can occur while establishing or using the peer link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the local listening port.
    #[error("failed to bind local port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    /// Failed to connect to the remote peer.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },

    /// Failed to accept the remote peer's connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer did not show up within the configured timeout.
    #[error("peer did not connect within {0:?}")]
    Timeout(Duration),

    /// The capacity handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Handshake JSON could not be serialized or parsed.
    #[error("handshake json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Both endpoints compare equal; a peer cannot link to itself.
    #[error("local and remote endpoints are identical")]
    SelfConnection,
}

pub type Result<T> = std::result::Result<T, TransportError>;
