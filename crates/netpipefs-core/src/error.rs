/// Errors surfaced by pipe engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Invalid arguments (e.g. opening read-write).
    #[error("invalid argument")]
    InvalidArgument,

    /// The opposite access mode already owns this pipe locally.
    #[error("operation not permitted")]
    NotPermitted,

    /// A non-blocking call could make no progress.
    #[error("operation would block")]
    WouldBlock,

    /// The peer closed the opposite side, or the link was forcibly torn down
    /// during a data operation.
    #[error("broken pipe")]
    BrokenPipe,

    /// Open raced with a forced exit.
    #[error("no such pipe")]
    NotFound,

    /// The transport failed mid-frame.
    #[error("connection reset by peer")]
    ConnectionReset,
}

impl PipeError {
    /// The raw OS error code a filesystem shim returns for this error.
    pub fn to_errno(self) -> i32 {
        match self {
            PipeError::InvalidArgument => libc::EINVAL,
            PipeError::NotPermitted => libc::EPERM,
            PipeError::WouldBlock => libc::EAGAIN,
            PipeError::BrokenPipe => libc::EPIPE,
            PipeError::NotFound => libc::ENOENT,
            PipeError::ConnectionReset => libc::ECONNRESET,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(PipeError::InvalidArgument.to_errno(), libc::EINVAL);
        assert_eq!(PipeError::NotPermitted.to_errno(), libc::EPERM);
        assert_eq!(PipeError::WouldBlock.to_errno(), libc::EAGAIN);
        assert_eq!(PipeError::BrokenPipe.to_errno(), libc::EPIPE);
        assert_eq!(PipeError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(PipeError::ConnectionReset.to_errno(), libc::ECONNRESET);
    }
}
