use symact_action::RegistryError;
use symact_frame::{status, FrameError};
use symact_transport::TransportError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Packet exchange failed (transport, size limit, encoding).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The peer requested an action this side does not serve.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The peer answered with a nonzero status.
    #[error("action {identifier} failed with status {status} ({})", status::status_name(*status))]
    Status { identifier: String, status: i32 },

    /// A response did not answer the request that was sent.
    #[error("response token mismatch (expected {expected}, got {actual})")]
    TokenMismatch { expected: u32, actual: u32 },

    /// No live session with this id.
    #[error("session {0} not found")]
    SessionNotFound(u32),

    /// The event loop thread is gone.
    #[error("session worker stopped")]
    WorkerStopped,

    /// The orchestrator could not be started.
    #[error("failed to start session worker: {0}")]
    Startup(String),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Frame(FrameError::Transport(err))
    }
}

impl SessionError {
    /// True for expected disconnections that should not be logged as errors.
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionError::Frame(err) if err.is_benign())
    }

    /// True when a per-call deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Frame(err) if err.is_timeout())
    }

    /// Remote status code, for application-level failures.
    pub fn status(&self) -> Option<i32> {
        match self {
            SessionError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
