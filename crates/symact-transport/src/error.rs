use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The OS pipe object could not be created (name collision, access denied, ...).
    #[error("failed to create pipe {name}: {source}")]
    Create {
        name: String,
        source: std::io::Error,
    },

    /// Failed to open the client end of a pipe.
    #[error("failed to connect to pipe {name}: {source}")]
    Connect {
        name: String,
        source: std::io::Error,
    },

    /// No server instance is currently available for the pipe name.
    ///
    /// Either nothing is listening yet or every instance is busy. Retryable.
    #[error("pipe {name} unavailable: {source}")]
    Unavailable {
        name: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection on a server instance.
    #[error("failed to accept pipe connection: {0}")]
    Accept(std::io::Error),

    /// The peer closed its end of the pipe.
    #[error("pipe broken: {0}")]
    PipeBroken(String),

    /// An unexpected I/O error occurred on a connected pipe.
    #[error("pipe I/O error: {0}")]
    Pipe(std::io::Error),

    /// A caller-bounded wait elapsed before the operation completed.
    #[error("pipe operation timed out after {0:?}")]
    Timeout(Duration),

    /// The resolved socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// Classify an I/O error raised on a connected pipe.
    ///
    /// Peer-closed conditions become [`TransportError::PipeBroken`]; anything
    /// else is a [`TransportError::Pipe`].
    pub fn from_io(err: std::io::Error) -> Self {
        if is_peer_closed(&err) {
            TransportError::PipeBroken(err.to_string())
        } else {
            TransportError::Pipe(err)
        }
    }

    /// True for expected disconnections that should not be logged as errors.
    pub fn is_benign(&self) -> bool {
        matches!(self, TransportError::PipeBroken(_))
    }

    /// True when a caller-supplied deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// True when a connect attempt may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

/// Windows error codes meaning the other end of the pipe went away.
const ERROR_BROKEN_PIPE: i32 = 109;
const ERROR_NO_DATA: i32 = 232;
const ERROR_PIPE_NOT_CONNECTED: i32 = 233;

fn is_peer_closed(err: &std::io::Error) -> bool {
    if cfg!(windows) {
        if let Some(code) = err.raw_os_error() {
            if matches!(
                code,
                ERROR_BROKEN_PIPE | ERROR_NO_DATA | ERROR_PIPE_NOT_CONNECTED
            ) {
                return true;
            }
        }
    }
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_closed_kinds_are_benign() {
        for kind in [
            ErrorKind::UnexpectedEof,
            ErrorKind::BrokenPipe,
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
        ] {
            let err = TransportError::from_io(std::io::Error::from(kind));
            assert!(err.is_benign(), "{kind:?} should classify as PipeBroken");
        }
    }

    #[test]
    fn other_io_errors_are_not_benign() {
        let err = TransportError::from_io(std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, TransportError::Pipe(_)));
        assert!(!err.is_benign());
    }

    #[test]
    fn timeout_is_distinguishable() {
        let err = TransportError::Timeout(Duration::from_millis(50));
        assert!(err.is_timeout());
        assert!(!err.is_benign());
        assert!(!err.is_retryable());
    }
}
