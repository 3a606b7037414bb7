//! Server pipe instances, client connect and endpoint availability.

use std::time::Duration;

use crate::error::Result;
use crate::name::PipeSecurity;
use crate::stream::IpcStream;

/// One unconnected server instance of a named pipe.
///
/// Created with [`PipeInstance::create`] and turned into a connected
/// [`IpcStream`] by [`PipeInstance::accept`]. Creating an instance requires a
/// Tokio runtime context.
pub struct PipeInstance {
    name: String,
    inner: InstanceInner,
}

enum InstanceInner {
    #[cfg(unix)]
    Unix(std::sync::Arc<crate::uds::SharedListener>),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeServer),
}

impl PipeInstance {
    /// Create an unconnected server instance named `name`.
    ///
    /// Fails with [`TransportError::Create`](crate::TransportError::Create) if
    /// the OS object cannot be created (name collision, access denied, ...).
    pub fn create(name: &str, security: &PipeSecurity) -> Result<Self> {
        #[cfg(unix)]
        let inner = {
            if let PipeSecurity::Sddl(_) = security {
                tracing::warn!(pipe = name, "SDDL security ignored on unix; using owner-only mode");
            }
            InstanceInner::Unix(crate::uds::SharedListener::obtain(
                name,
                security.unix_mode(),
            )?)
        };
        #[cfg(windows)]
        let inner = InstanceInner::Pipe(crate::windows::create_instance(name, security)?);

        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    /// Suspend until a peer connects to this instance.
    ///
    /// A peer that connected between creation and this call counts as a
    /// successful accept.
    pub async fn accept(self) -> Result<IpcStream> {
        match self.inner {
            #[cfg(unix)]
            InstanceInner::Unix(listener) => listener.accept().await,
            #[cfg(windows)]
            InstanceInner::Pipe(server) => {
                // tokio maps ERROR_PIPE_CONNECTED to success.
                server
                    .connect()
                    .await
                    .map_err(crate::TransportError::Accept)?;
                tracing::debug!(pipe = %self.name, "accepted named pipe connection");
                Ok(IpcStream::from_pipe_server(server))
            }
        }
    }

    /// The pipe name this instance serves.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for PipeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeInstance")
            .field("name", &self.name)
            .finish()
    }
}

/// Open the client end of pipe `name`.
///
/// "No listener yet" and "all instances busy" fail with the retryable
/// [`TransportError::Unavailable`](crate::TransportError::Unavailable).
pub async fn connect(name: &str) -> Result<IpcStream> {
    #[cfg(unix)]
    {
        crate::uds::connect(name).await
    }
    #[cfg(windows)]
    {
        crate::windows::open_client(name).map(IpcStream::from_pipe_client)
    }
}

/// True when a server endpoint named `name` currently exists.
pub fn endpoint_exists(name: &str) -> bool {
    #[cfg(unix)]
    {
        crate::uds::endpoint_exists(name)
    }
    #[cfg(windows)]
    {
        crate::windows::endpoint_exists(name)
    }
}

/// Poll until an endpoint named `name` exists or `timeout` elapses.
pub async fn wait_for_availability(name: &str, timeout: Duration, poll_period: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if endpoint_exists(name) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_period).await;
    }
}

/// Keeps a pipe endpoint present between server instances.
///
/// On Unix this holds the shared listener bound so connecting clients never
/// observe a missing socket while no instance is accepting. Named pipes need
/// no reservation; the value is inert on Windows.
#[derive(Debug)]
pub struct EndpointReservation {
    name: String,
    #[cfg(unix)]
    _listener: std::sync::Arc<crate::uds::SharedListener>,
}

impl EndpointReservation {
    /// The reserved pipe name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reserve the endpoint `name` for the lifetime of the returned value.
pub fn reserve_endpoint(name: &str, security: &PipeSecurity) -> Result<EndpointReservation> {
    #[cfg(unix)]
    {
        let listener = crate::uds::SharedListener::obtain(name, security.unix_mode())?;
        Ok(EndpointReservation {
            name: name.to_string(),
            _listener: listener,
        })
    }
    #[cfg(windows)]
    {
        let _ = security;
        Ok(EndpointReservation {
            name: name.to_string(),
        })
    }
}
