//! Symmetric action sessions over pairs of duplex pipes.
//!
//! A session joins two peers through two pipes, one per request direction,
//! so either side may dispatch actions to the other at any time.
//! [`ActionServer`] accepts any number of sessions on a base pipe name;
//! [`ActionClient`] opens one. Both run their sessions on a dedicated thread
//! with a single-threaded event loop, which keeps every session's state on
//! one thread and lets action code use plain `Cell`/`RefCell` state.
//!
//! ```no_run
//! use symact_action::{ActionRegistry, ExecutionContext};
//! use symact_session::{ActionServer, ServerConfig};
//!
//! struct Service;
//!
//! impl ExecutionContext for Service {
//!     type Session = ();
//! }
//!
//! let server = ActionServer::start(
//!     ServerConfig::new(r"\\.\pipe\telemetry"),
//!     Service,
//!     ActionRegistry::default(),
//! )?;
//! println!("{} sessions", server.session_ids().len());
//! # Ok::<(), symact_session::SessionError>(())
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod server;
pub mod slot;
pub mod table;
mod worker;

pub use client::ActionClient;
pub use config::{ClientConfig, ServerConfig, DEFAULT_PIPE_NAME, DEFAULT_RESERVED_INSTANCES};
pub use connector::Connector;
pub use error::{Result, SessionError};
pub use server::ActionServer;
pub use slot::{SlotCounts, SlotState};
pub use table::{dispose_session, serve_session, Session, SessionTable};
