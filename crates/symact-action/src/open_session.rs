//! Built-in session bootstrap action.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{Action, ActionSpec, ExecutionContext};
use crate::context::SessionContext;
use crate::error::ActionError;

/// First action exchanged on every session: the caller identifies itself and
/// learns who serves it.
pub struct OpenSession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionParams {
    pub client_pid: u32,
    pub client_build_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub server_pid: u32,
    pub server_build_id: String,
}

impl OpenSessionParams {
    /// Parameters identifying the current process.
    pub fn current(build_id: impl Into<String>) -> Self {
        Self {
            client_pid: std::process::id(),
            client_build_id: build_id.into(),
        }
    }
}

impl ActionSpec for OpenSession {
    const IDENTIFIER: &'static str = "OpenSession";
    type Params = OpenSessionParams;
    type Response = OpenSessionResponse;
}

impl<C: ExecutionContext> Action<C> for OpenSession {
    fn execute(
        ctx: &C,
        stx: &mut SessionContext<C::Session>,
        params: OpenSessionParams,
    ) -> Result<OpenSessionResponse, ActionError> {
        let reopened = stx.remote_pid();
        stx.set_remote(params.client_pid, params.client_build_id);
        match reopened {
            // The open hook runs once per session; a repeat only refreshes the peer.
            Some(previous) => warn!(
                session_id = stx.session_id(),
                previous,
                remote_pid = params.client_pid,
                "session opened twice"
            ),
            None => {
                info!(
                    session_id = stx.session_id(),
                    remote_pid = params.client_pid,
                    remote_build = stx.remote_build_id().unwrap_or_default(),
                    "session opened"
                );
                ctx.on_session_opened(stx);
            }
        }

        Ok(OpenSessionResponse {
            server_pid: std::process::id(),
            server_build_id: ctx.build_id().to_string(),
        })
    }
}
