use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::SessionContext;
use crate::error::ActionError;

/// Wire identity of an action: its identifier and message types.
///
/// This is all a caller needs to dispatch the action to a peer.
pub trait ActionSpec: 'static {
    /// Identifier carried in the request header. Unique within a registry.
    const IDENTIFIER: &'static str;
    type Params: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

/// An action implemented by the local side for execution context `C`.
///
/// Runs to completion on the session's event loop thread.
pub trait Action<C: ExecutionContext>: ActionSpec {
    fn execute(
        ctx: &C,
        stx: &mut SessionContext<C::Session>,
        params: Self::Params,
    ) -> Result<Self::Response, ActionError>;
}

/// The application surrounding a set of actions.
pub trait ExecutionContext: 'static {
    /// Application state kept per session.
    type Session: Default + 'static;

    /// Called after the peer identified itself with `OpenSession`.
    fn on_session_opened(&self, _stx: &mut SessionContext<Self::Session>) {}

    /// Called once when an identified session ends.
    fn dispose(&self, _stx: &mut SessionContext<Self::Session>) {}

    /// Deadline for writing a response back to the peer.
    fn response_write_timeout(&self) -> Option<Duration> {
        None
    }

    /// Build identifier exchanged in `OpenSession`.
    fn build_id(&self) -> &str {
        concat!("symact-", env!("CARGO_PKG_VERSION"))
    }
}
