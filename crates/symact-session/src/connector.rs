use std::cell::RefCell;
use std::time::Duration;

use symact_action::{ActionRegistry, ActionSpec, ExecutionContext, OpenSession, SessionContext};
use symact_frame::{
    status, DuplexPipe, EncodedPacket, FrameConfig, FrameError, RequestHeader, ResponseHeader,
};
use symact_transport::{inbound_name, outbound_name, PipeSecurity};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};

/// Pause between connect attempts while the server has no free instance.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Protocol engine for one session: two framed pipes, one per direction.
///
/// Requests from the peer arrive on `inbound` and are answered there; this
/// side's own requests go out on `outbound` and are answered there.
pub struct Connector {
    inbound: DuplexPipe,
    outbound: DuplexPipe,
    dispatch_gate: Mutex<()>,
}

impl Connector {
    pub fn from_pipes(inbound: DuplexPipe, outbound: DuplexPipe) -> Self {
        Self {
            inbound,
            outbound,
            dispatch_gate: Mutex::new(()),
        }
    }

    /// Create both server pipes of a session and wait until a peer has
    /// connected to each.
    pub async fn accept_session(
        base: &str,
        security: &PipeSecurity,
        config: FrameConfig,
    ) -> Result<Self> {
        let outbound = DuplexPipe::make_server(outbound_name(base), security, config.clone())?;
        let inbound = DuplexPipe::make_server(inbound_name(base), security, config)?;
        let (inbound, outbound) = tokio::try_join!(inbound.accept(), outbound.accept())?;
        debug!(pipe = base, session_id = inbound.id(), "session pipes accepted");
        Ok(Self::from_pipes(inbound, outbound))
    }

    /// Connect to a peer's listening session pipes.
    ///
    /// Retries while no server instance is available, until `connect_timeout`.
    pub async fn connect_session(
        base: &str,
        config: FrameConfig,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + connect_timeout;
        // The peer's inbound pipe carries our requests, and the other way round.
        let outbound = connect_with_retry(&inbound_name(base), &config, deadline).await?;
        let inbound = connect_with_retry(&outbound_name(base), &config, deadline).await?;
        debug!(pipe = base, session_id = inbound.id(), "session pipes connected");
        Ok(Self::from_pipes(inbound, outbound))
    }

    /// Two connected in-memory connectors: `(acceptor, initiator)`.
    pub fn memory_pair(base: &str, config: FrameConfig) -> (Self, Self) {
        let (accept_in, connect_out) = DuplexPipe::memory_pair(&inbound_name(base), config.clone());
        let (accept_out, connect_in) = DuplexPipe::memory_pair(&outbound_name(base), config);
        (
            Self::from_pipes(accept_in, accept_out),
            Self::from_pipes(connect_in, connect_out),
        )
    }

    /// Session id: the id of the inbound pipe.
    pub fn id(&self) -> u32 {
        self.inbound.id()
    }

    pub fn inbound(&self) -> &DuplexPipe {
        &self.inbound
    }

    pub fn outbound(&self) -> &DuplexPipe {
        &self.outbound
    }

    /// Read one request from the peer, run it, and write the response.
    ///
    /// A failing action is answered with its status and the session goes on.
    /// A malformed request or an unknown identifier is answered with a
    /// protocol status, then reported as an error that ends the session.
    /// Transport errors are returned as-is.
    pub async fn handle_one_request<C: ExecutionContext>(
        &self,
        ctx: &C,
        registry: &ActionRegistry<C>,
        stx: &RefCell<SessionContext<C::Session>>,
    ) -> Result<()> {
        let mut packet = self.inbound.read_packet(None).await?;
        let header = match packet.consume_header::<RequestHeader>() {
            Ok(header) => header,
            Err(err) => {
                stx.borrow_mut().record_error();
                self.reject(0, status::TRANSPORT_FAILURE, ctx).await;
                return Err(err.into());
            }
        };
        let token = header.command_token;

        {
            let mut stx = stx.borrow_mut();
            stx.record_request(token);
            if !stx.is_opened() && header.identifier != OpenSession::IDENTIFIER {
                warn!(
                    session_id = stx.session_id(),
                    action = %header.identifier,
                    token,
                    "request before OpenSession"
                );
            }
        }

        let handler = match registry.find(&header.identifier) {
            Ok(handler) => handler,
            Err(err) => {
                stx.borrow_mut().record_error();
                self.reject(token, status::UNKNOWN_ACTION, ctx).await;
                return Err(err.into());
            }
        };

        let executed = {
            let mut stx = stx.borrow_mut();
            handler.execute(ctx, &mut stx, token, packet)
        };
        let response = match executed {
            Ok(response) => response,
            Err(err) => {
                stx.borrow_mut().record_error();
                self.reject(token, status::TRANSPORT_FAILURE, ctx).await;
                return Err(err.into());
            }
        };

        if header.identifier == OpenSession::IDENTIFIER {
            self.check_peer_pid(&stx.borrow());
        }

        self.inbound
            .write_encoded(response, ctx.response_write_timeout())
            .await?;
        Ok(())
    }

    /// Send `params` as a request for action `A` and wait for its response.
    ///
    /// Dispatches on one connector are serialized: a second call waits until
    /// the first has its response.
    pub async fn dispatch<A: ActionSpec, S>(
        &self,
        stx: &RefCell<SessionContext<S>>,
        params: &A::Params,
        timeout: Option<Duration>,
    ) -> Result<A::Response> {
        let _gate = self.dispatch_gate.lock().await;
        let token = stx.borrow_mut().take_command_token();

        let header = RequestHeader {
            identifier: A::IDENTIFIER.to_string(),
            command_token: token,
        };
        self.outbound.write_packet(&header, params, timeout).await?;

        let (response, packet) = loop {
            let (response, packet) = self
                .outbound
                .read_packet_consume_header::<ResponseHeader>(timeout)
                .await?;
            if response.command_token == token {
                break (response, packet);
            }
            if is_earlier(response.command_token, token) {
                // Answer to a request whose caller already timed out.
                debug!(
                    action = A::IDENTIFIER,
                    token = response.command_token,
                    "discarding late response"
                );
                continue;
            }
            return Err(SessionError::TokenMismatch {
                expected: token,
                actual: response.command_token,
            });
        };

        if response.status != status::SUCCESS {
            return Err(SessionError::Status {
                identifier: A::IDENTIFIER.to_string(),
                status: response.status,
            });
        }
        Ok(packet.consume_payload::<A::Response>()?)
    }

    /// Best-effort failure response; the session is about to end anyway.
    async fn reject<C: ExecutionContext>(&self, token: u32, code: i32, ctx: &C) {
        let written = match EncodedPacket::status_only(token, code) {
            Ok(packet) => {
                self.inbound
                    .write_encoded(packet, ctx.response_write_timeout())
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            debug!(session_id = self.id(), token, error = %err, "could not send failure response");
        }
    }

    fn check_peer_pid<S>(&self, stx: &SessionContext<S>) {
        if let (Some((_, _, peer_pid)), Some(announced)) =
            (self.inbound.peer_credentials(), stx.remote_pid())
        {
            if peer_pid != announced {
                warn!(
                    session_id = stx.session_id(),
                    announced,
                    peer_pid,
                    "OpenSession pid does not match pipe peer"
                );
            }
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// True when token `a` was issued before `b`, allowing for wraparound.
fn is_earlier(a: u32, b: u32) -> bool {
    let distance = b.wrapping_sub(a);
    distance != 0 && distance < u32::MAX / 2
}

async fn connect_with_retry(name: &str, config: &FrameConfig, deadline: Instant) -> Result<DuplexPipe> {
    loop {
        match DuplexPipe::connect(name, config.clone()).await {
            Ok(pipe) => return Ok(pipe),
            Err(FrameError::Transport(err)) if err.is_retryable() && Instant::now() < deadline => {
                debug!(pipe = name, error = %err, "pipe unavailable, retrying");
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
