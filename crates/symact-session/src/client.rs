use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use symact_action::{
    ActionRegistry, ActionSpec, ExecutionContext, OpenSession, OpenSessionParams,
};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::{worker_thread_name, ClientConfig};
use crate::connector::Connector;
use crate::error::{Result, SessionError};
use crate::table::{dispose_session, log_session_end, serve_session, DropGuard, Session};
use crate::worker::Worker;

/// Client state owned by the event loop thread.
pub(crate) struct ClientCore<C: ExecutionContext> {
    config: ClientConfig,
    ctx: C,
    registry: ActionRegistry<C>,
    session_id: u32,
    session: RefCell<Option<Rc<Session<C::Session>>>>,
    connected: Arc<AtomicBool>,
}

impl<C: ExecutionContext> ClientCore<C> {
    /// Serve requests the server sends us until the session ends.
    async fn serve(self: Rc<Self>, session: Rc<Session<C::Session>>) {
        let session_id = session.id();
        let _cleanup = DropGuard::new(|| {
            self.session.borrow_mut().take();
            self.connected.store(false, Ordering::SeqCst);
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

    async fn dispatch<A: ActionSpec>(&self, params: &A::Params) -> Result<A::Response> {
        let session = self
            .session
            .borrow()
            .clone()
            .ok_or(SessionError::SessionNotFound(self.session_id))?;
        session
            .connector
            .dispatch::<A, _>(&session.context, params, self.config.dispatch_timeout)
            .await
    }
}

/// One session with an [`ActionServer`](crate::ActionServer).
///
/// Connects on construction, identifies itself with `OpenSession`, and
/// serves the actions in its own registry to the server for as long as the
/// session lasts.
pub struct ActionClient<C: ExecutionContext> {
    worker: Worker<ClientCore<C>>,
    connected: Arc<AtomicBool>,
    session_id: u32,
    server_pid: u32,
    server_build_id: String,
    pipe_name: String,
}

impl<C: ExecutionContext + Send> ActionClient<C> {
    /// Connect to the server at `config.pipe_name` and open a session.
    pub fn connect(config: ClientConfig, ctx: C, registry: ActionRegistry<C>) -> Result<Self> {
        let connected = Arc::new(AtomicBool::new(false));
        let core_connected = Arc::clone(&connected);
        let pipe_name = config.pipe_name.clone();
        let thread_name = worker_thread_name(&config.pipe_name, "cli");
        let fatal_exit = config.fatal_exit;

        let (worker, (session_id, server_pid, server_build_id)) =
            Worker::spawn(thread_name, fatal_exit, move |_fatal| async move {
                let connector = Connector::connect_session(
                    &config.pipe_name,
                    config.frame.clone(),
                    config.connect_timeout,
                )
                .await?;
                let session = Rc::new(Session::new(connector));
                let session_id = session.id();
                let core = Rc::new(ClientCore {
                    config,
                    ctx,
                    registry,
                    session_id,
                    session: RefCell::new(Some(Rc::clone(&session))),
                    connected: core_connected,
                });
                core.connected.store(true, Ordering::SeqCst);
                tokio::task::spawn_local(Rc::clone(&core).serve(Rc::clone(&session)));

                let params = OpenSessionParams::current(core.ctx.build_id());
                let opened = core.dispatch::<OpenSession>(&params).await?;
                {
                    let mut stx = session.context.borrow_mut();
                    stx.set_remote(opened.server_pid, opened.server_build_id.clone());
                    core.ctx.on_session_opened(&mut stx);
                }
                info!(
                    session_id,
                    pipe = %core.config.pipe_name,
                    remote_pid = opened.server_pid,
                    remote_build = %opened.server_build_id,
                    "connected to action server"
                );
                Ok::<_, SessionError>((core, (session_id, opened.server_pid, opened.server_build_id)))
            })?;

        Ok(Self {
            worker,
            connected,
            session_id,
            server_pid,
            server_build_id,
            pipe_name,
        })
    }
}

impl<C: ExecutionContext> ActionClient<C> {
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Process id the server announced in `OpenSession`.
    pub fn server_pid(&self) -> u32 {
        self.server_pid
    }

    pub fn server_build_id(&self) -> &str {
        &self.server_build_id
    }

    /// False once the session has ended.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a request to the server.
    pub async fn dispatch<A: ActionSpec>(&self, params: A::Params) -> Result<A::Response> {
        let response = self.submit_dispatch::<A>(params)?;
        response.await.map_err(|_| SessionError::WorkerStopped)?
    }

    /// Like [`dispatch`](Self::dispatch), blocking the calling thread.
    ///
    /// Must not be called from inside an async runtime.
    pub fn dispatch_sync<A: ActionSpec>(&self, params: A::Params) -> Result<A::Response> {
        let response = self.submit_dispatch::<A>(params)?;
        response
            .blocking_recv()
            .map_err(|_| SessionError::WorkerStopped)?
    }

    /// Send a request without waiting for the response. Failures are logged.
    pub fn dispatch_detached<A: ActionSpec>(&self, params: A::Params) -> Result<()> {
        let session_id = self.session_id;
        self.dispatch_with::<A, _>(params, move |result| {
            if let Err(err) = result {
                warn!(action = A::IDENTIFIER, session_id, error = %err, "detached dispatch failed");
            }
        })
    }

    /// Send a request and run `then` with the result on the event loop thread.
    pub fn dispatch_with<A, F>(&self, params: A::Params, then: F) -> Result<()>
    where
        A: ActionSpec,
        F: FnOnce(Result<A::Response>) + Send + 'static,
    {
        self.worker.submit(move |core: Rc<ClientCore<C>>| {
            async move { then(core.dispatch::<A>(&params).await) }.boxed_local()
        })?;
        Ok(())
    }

    /// Close the session and stop the event loop thread.
    pub fn shutdown(mut self) {
        self.worker.shutdown();
    }

    fn submit_dispatch<A: ActionSpec>(
        &self,
        params: A::Params,
    ) -> Result<oneshot::Receiver<Result<A::Response>>> {
        self.worker.submit(move |core: Rc<ClientCore<C>>| {
            async move { core.dispatch::<A>(&params).await }.boxed_local()
        })
    }
}

impl<C: ExecutionContext> std::fmt::Debug for ActionClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionClient")
            .field("pipe_name", &self.pipe_name)
            .field("session_id", &self.session_id)
            .field("server_pid", &self.server_pid)
            .field("connected", &self.is_connected())
            .finish()
    }
}
