use symact_transport::TransportError;

/// Errors that can occur while encoding, decoding or exchanging packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The underlying pipe failed, closed, or an I/O deadline elapsed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The packet body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A header or payload could not be serialized.
    #[error("failed to encode packet: {0}")]
    Encode(bincode::Error),

    /// A header or payload could not be deserialized from the packet body.
    #[error("failed to decode packet: {0}")]
    Decode(bincode::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Transport(TransportError::from_io(err))
    }
}

impl FrameError {
    /// True for expected disconnections that should not be logged as errors.
    pub fn is_benign(&self) -> bool {
        matches!(self, FrameError::Transport(err) if err.is_benign())
    }

    /// True when a per-call deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Transport(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_by_transport() {
        let closed = FrameError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(closed.is_benign());

        let denied = FrameError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!denied.is_benign());
        assert!(!denied.is_timeout());
    }

    #[test]
    fn timeout_passes_through() {
        let err = FrameError::from(TransportError::Timeout(std::time::Duration::from_millis(5)));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "pipe operation timed out after 5ms");
    }
}
