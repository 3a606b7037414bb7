use std::fmt;
use std::io;

use symact_frame::{status, FrameError};
use symact_session::SessionError;
use symact_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Create { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Pipe(source) => io_error(context, source),
        TransportError::Unavailable { .. } | TransportError::Timeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::PipeBroken(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } | FrameError::Decode(_) | FrameError::Encode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Status { status: code, .. } if code == status::UNKNOWN_ACTION => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::Status { .. } | SessionError::SessionNotFound(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        SessionError::TokenMismatch { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn remote_status_is_a_failure() {
        let err = session_error(
            "call failed",
            SessionError::Status {
                identifier: "SetTelemetryPeriod".into(),
                status: status::OUT_OF_RANGE,
            },
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("OUT_OF_RANGE"));
    }

    #[test]
    fn unavailable_server_times_out() {
        let err = session_error(
            "connect failed",
            SessionError::from(TransportError::Unavailable {
                name: "x".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        );
        assert_eq!(err.code, TIMEOUT);

        let err = session_error(
            "call failed",
            SessionError::from(TransportError::Timeout(Duration::from_secs(1))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn unknown_action_is_usage() {
        let err = session_error(
            "call failed",
            SessionError::Status {
                identifier: "Nope".into(),
                status: status::UNKNOWN_ACTION,
            },
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn worker_stop_is_internal() {
        assert_eq!(session_error("x", SessionError::WorkerStopped).code, INTERNAL);
    }
}
