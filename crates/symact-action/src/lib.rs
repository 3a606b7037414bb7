//! Typed actions and the action registry.
//!
//! An action is a named, statically typed request/response operation. Each
//! side of a session builds one [`ActionRegistry`] at startup listing the
//! actions it serves; incoming requests are routed by identifier to a
//! type-erased [`ActionHandler`] that decodes parameters, runs the action and
//! encodes the response.

pub mod action;
pub mod context;
pub mod error;
pub mod handler;
pub mod open_session;
pub mod registry;

pub use action::{Action, ActionSpec, ExecutionContext};
pub use context::SessionContext;
pub use error::{ActionError, RegistryError, Result};
pub use handler::ActionHandler;
pub use open_session::{OpenSession, OpenSessionParams, OpenSessionResponse};
pub use registry::{ActionRegistry, ActionRegistryBuilder};
