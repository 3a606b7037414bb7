//! Async duplex pipe transport.
//!
//! Provides one connected byte stream per pipe over different local
//! transport mechanisms:
//! - Named pipes (Windows)
//! - Unix domain sockets (Linux/macOS), addressed by the same pipe names
//! - In-memory duplex streams (tests, in-process sessions)
//!
//! This is the lowest layer of symact. Framing, action dispatch and session
//! orchestration build on the [`IpcStream`] and [`PipeInstance`] types here.

pub mod error;
pub mod instance;
pub mod name;
pub mod stream;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod windows;

pub use error::{Result, TransportError};
pub use instance::{
    connect, endpoint_exists, reserve_endpoint, wait_for_availability, EndpointReservation,
    PipeInstance,
};
pub use name::{inbound_name, outbound_name, short_name, PipeSecurity};
pub use stream::IpcStream;
