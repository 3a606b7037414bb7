use symact_frame::status;

/// Errors raised while building or querying an action registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two actions were registered under the same identifier.
    #[error("action identifier registered twice: {0}")]
    DuplicateIdentifier(&'static str),

    /// No action is registered under the requested identifier.
    #[error("no action registered for identifier '{0}'")]
    UnknownIdentifier(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failure reported by an action's own logic.
///
/// Turned into a response carrying `code` as its status; the session stays up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action failed with status {code}: {message}")]
pub struct ActionError {
    pub code: i32,
    pub message: String,
}

impl ActionError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(status::FAILURE, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(status::OUT_OF_RANGE, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(status::INVALID_PARAMS, message)
    }

    /// Status written to the wire. Never [`status::SUCCESS`].
    pub fn status(&self) -> i32 {
        if self.code == status::SUCCESS {
            status::FAILURE
        } else {
            self.code
        }
    }
}
