//! Symmetric action RPC over duplex pipes.
//!
//! symact connects processes on one machine through pairs of named pipes and
//! lets either side call typed actions on the other, with per-session state
//! and lifecycle hooks.
//!
//! # Crate Structure
//!
//! - [`transport`]: Pipe instances, connection and name resolution
//! - [`frame`]: Length-prefixed packets and framed duplex pipes
//! - [`action`]: Typed actions, execution contexts and the action registry
//! - [`session`]: Connectors, servers and clients
//! - [`service`]: Demo telemetry control service (behind `service` feature)

/// Re-export transport types.
pub mod transport {
    pub use symact_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use symact_frame::*;
}

/// Re-export action types.
pub mod action {
    pub use symact_action::*;
}

/// Re-export session types.
pub mod session {
    pub use symact_session::*;
}

#[cfg(feature = "service")]
pub mod service;

pub use symact_action::{Action, ActionError, ActionRegistry, ActionSpec, ExecutionContext, SessionContext};
pub use symact_session::{ActionClient, ActionServer, ClientConfig, ServerConfig, SessionError};
