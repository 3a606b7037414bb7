use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::time::Duration;

use futures_util::FutureExt;
use symact_action::{ActionRegistry, ActionSpec, ExecutionContext};
use symact_frame::FrameError;
use symact_transport::{inbound_name, outbound_name, reserve_endpoint, EndpointReservation, TransportError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{worker_thread_name, ServerConfig};
use crate::connector::Connector;
use crate::error::{Result, SessionError};
use crate::slot::{SharedState, Slot, SlotCounts, SlotState};
use crate::table::{dispose_session, log_session_end, serve_session, DropGuard, Session, SessionTable};
use crate::worker::{FatalHandle, Worker};

/// Pause before accepting again after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Server state owned by the event loop thread.
pub(crate) struct ServerCore<C: ExecutionContext> {
    config: ServerConfig,
    ctx: C,
    registry: ActionRegistry<C>,
    sessions: RefCell<SessionTable<C::Session>>,
    accept_gate: Mutex<()>,
    shared: SharedState,
    fatal: FatalHandle,
    _reservations: [EndpointReservation; 2],
}

impl<C: ExecutionContext> ServerCore<C> {
    fn spawn_slot(self: &Rc<Self>) {
        tokio::task::spawn_local(Rc::clone(self).run_slot());
    }

    /// One slot: accept a peer, hand the accepting role to a fresh slot,
    /// serve the session, and clean up when it ends.
    async fn run_slot(self: Rc<Self>) {
        let mut slot = Slot::new(self.shared.clone());

        let accepted = AssertUnwindSafe(self.accept_one(&mut slot))
            .catch_unwind()
            .await;
        let Ok(connector) = accepted else {
            self.fatal.trigger("session slot panicked while accepting");
            return;
        };

        slot.enter(SlotState::Active);
        self.spawn_slot();

        let session = Rc::new(Session::new(connector));
        let session_id = session.id();
        self.sessions.borrow_mut().insert(Rc::clone(&session));
        self.shared.add_session(session_id);
        info!(session_id, pipe = %self.config.pipe_name, "session accepted");

        let _cleanup = DropGuard::new(|| {
            self.sessions.borrow_mut().remove(session_id);
            self.shared.remove_session(session_id);
            slot.enter(SlotState::Disposed);
            dispose_session(&self.ctx, &session);
        });

        let served = AssertUnwindSafe(serve_session(&self.ctx, &self.registry, &session))
            .catch_unwind()
            .await;
        match served {
            Ok(err) => log_session_end(session_id, &err),
            Err(_) => error!(session_id, "session task panicked"),
        }
    }

    async fn accept_one(&self, slot: &mut Slot) -> Connector {
        loop {
            let attempt = {
                let _gate = self.accept_gate.lock().await;
                slot.enter(SlotState::Accepting);
                Connector::accept_session(
                    &self.config.pipe_name,
                    &self.config.security,
                    self.config.frame.clone(),
                )
                .await
            };
            let err = match attempt {
                Ok(connector) => return connector,
                Err(err) => err,
            };

            slot.enter(SlotState::Idle);
            let delay = if is_create_failure(&err) {
                error!(pipe = %self.config.pipe_name, error = %err, "failed to create pipe instance");
                self.config.create_retry_delay
            } else {
                warn!(pipe = %self.config.pipe_name, error = %err, "failed to accept session");
                ACCEPT_RETRY_DELAY
            };
            tokio::time::sleep(delay).await;
        }
    }

    async fn dispatch<A: ActionSpec>(&self, session_id: u32, params: &A::Params) -> Result<A::Response> {
        let session = self
            .sessions
            .borrow()
            .get(session_id)
            .ok_or(SessionError::SessionNotFound(session_id))?;
        session
            .connector
            .dispatch::<A, _>(&session.context, params, None)
            .await
    }
}

fn is_create_failure(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::Frame(FrameError::Transport(TransportError::Create { .. }))
    )
}

/// Accepts sessions on a base pipe name and serves actions to every peer.
///
/// Runs on its own thread with a single-threaded event loop. A fixed number
/// of slots always waits for new peers; every accepted session is served
/// until the peer leaves.
pub struct ActionServer<C: ExecutionContext> {
    worker: Worker<ServerCore<C>>,
    shared: SharedState,
    pipe_name: String,
}

impl<C: ExecutionContext + Send> ActionServer<C> {
    /// Start serving `registry` on `config.pipe_name`.
    pub fn start(config: ServerConfig, ctx: C, registry: ActionRegistry<C>) -> Result<Self> {
        if config.reserved_instances == 0 {
            return Err(SessionError::Startup(
                "reserved_instances must be at least 1".to_string(),
            ));
        }

        let shared = SharedState::default();
        let pipe_name = config.pipe_name.clone();
        let thread_name = worker_thread_name(&config.pipe_name, "srv");
        let fatal_exit = config.fatal_exit;
        let core_shared = shared.clone();

        let (worker, ()) = Worker::spawn(thread_name, fatal_exit, move |fatal| async move {
            let reservations = [
                reserve_endpoint(&inbound_name(&config.pipe_name), &config.security)?,
                reserve_endpoint(&outbound_name(&config.pipe_name), &config.security)?,
            ];
            let core = Rc::new(ServerCore {
                ctx,
                registry,
                sessions: RefCell::new(SessionTable::default()),
                accept_gate: Mutex::new(()),
                shared: core_shared,
                fatal,
                _reservations: reservations,
                config,
            });
            for _ in 0..core.config.reserved_instances {
                core.spawn_slot();
            }
            info!(
                pipe = %core.config.pipe_name,
                reserved_instances = core.config.reserved_instances,
                actions = ?core.registry.identifiers(),
                "action server started"
            );
            Ok::<_, SessionError>((core, ()))
        })?;

        Ok(Self {
            worker,
            shared,
            pipe_name,
        })
    }
}

impl<C: ExecutionContext> ActionServer<C> {
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    /// Current slot counters.
    pub fn stats(&self) -> SlotCounts {
        self.shared.counts()
    }

    /// Ids of the live sessions, sorted.
    pub fn session_ids(&self) -> Vec<u32> {
        self.shared.session_ids()
    }

    /// Send a request to the peer of session `session_id`.
    pub async fn dispatch<A: ActionSpec>(&self, session_id: u32, params: A::Params) -> Result<A::Response> {
        let response = self.submit_dispatch::<A>(session_id, params)?;
        response.await.map_err(|_| SessionError::WorkerStopped)?
    }

    /// Like [`dispatch`](Self::dispatch), blocking the calling thread.
    ///
    /// Must not be called from inside an async runtime.
    pub fn dispatch_sync<A: ActionSpec>(&self, session_id: u32, params: A::Params) -> Result<A::Response> {
        let response = self.submit_dispatch::<A>(session_id, params)?;
        response
            .blocking_recv()
            .map_err(|_| SessionError::WorkerStopped)?
    }

    /// Send a request without waiting for the response. Failures are logged.
    pub fn dispatch_detached<A: ActionSpec>(&self, session_id: u32, params: A::Params) -> Result<()> {
        self.dispatch_with::<A, _>(session_id, params, move |result| {
            if let Err(err) = result {
                warn!(action = A::IDENTIFIER, session_id, error = %err, "detached dispatch failed");
            }
        })
    }

    /// Send a request and run `then` with the result on the event loop thread.
    pub fn dispatch_with<A, F>(&self, session_id: u32, params: A::Params, then: F) -> Result<()>
    where
        A: ActionSpec,
        F: FnOnce(Result<A::Response>) + Send + 'static,
    {
        self.worker.submit(move |core: Rc<ServerCore<C>>| {
            async move { then(core.dispatch::<A>(session_id, &params).await) }.boxed_local()
        })?;
        Ok(())
    }

    /// Stop accepting, end every session and release the endpoints.
    pub fn shutdown(mut self) {
        info!(pipe = %self.pipe_name, "action server shutting down");
        self.worker.shutdown();
    }

    fn submit_dispatch<A: ActionSpec>(
        &self,
        session_id: u32,
        params: A::Params,
    ) -> Result<tokio::sync::oneshot::Receiver<Result<A::Response>>> {
        self.worker.submit(move |core: Rc<ServerCore<C>>| {
            async move { core.dispatch::<A>(session_id, &params).await }.boxed_local()
        })
    }
}

impl<C: ExecutionContext> std::fmt::Debug for ActionServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionServer")
            .field("pipe_name", &self.pipe_name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx;

    impl ExecutionContext for Ctx {
        type Session = ();
    }

    #[test]
    fn zero_reserved_instances_is_rejected() {
        let config = ServerConfig::new("symact-zero-slots").with_reserved_instances(0);
        let err = ActionServer::start(config, Ctx, ActionRegistry::default())
            .expect_err("zero slots must fail");
        assert!(matches!(err, SessionError::Startup(_)));
    }

    #[test]
    fn create_failures_are_recognised() {
        let create = SessionError::from(TransportError::Create {
            name: "x".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert!(is_create_failure(&create));
        assert!(!is_create_failure(&SessionError::WorkerStopped));
    }
}
