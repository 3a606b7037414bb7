use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use symact_action::{ActionRegistry, ExecutionContext, SessionContext};
use tracing::{debug, error, info};

use crate::connector::Connector;
use crate::error::SessionError;

/// A live session: its protocol engine and its context.
#[derive(Debug)]
pub struct Session<S> {
    pub connector: Connector,
    pub context: RefCell<SessionContext<S>>,
}

impl<S: Default> Session<S> {
    pub fn new(connector: Connector) -> Self {
        let context = RefCell::new(SessionContext::new(connector.id()));
        Self { connector, context }
    }
}

impl<S> Session<S> {
    pub fn id(&self) -> u32 {
        self.connector.id()
    }
}

/// Live sessions of one orchestrator, keyed by session id.
///
/// Owned by the event loop thread; never shared across threads.
#[derive(Debug)]
pub struct SessionTable<S> {
    sessions: HashMap<u32, Rc<Session<S>>>,
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<S> SessionTable<S> {
    pub fn insert(&mut self, session: Rc<Session<S>>) {
        self.sessions.insert(session.id(), session);
    }

    pub fn remove(&mut self, id: u32) -> Option<Rc<Session<S>>> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<Rc<Session<S>>> {
        self.sessions.get(&id).cloned()
    }

    /// Session ids, sorted.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and return every session.
    pub fn drain(&mut self) -> Vec<Rc<Session<S>>> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }
}

/// Handle requests from the peer until the session ends.
///
/// Returns the error that ended it; a closed pipe shows up as a benign one.
pub async fn serve_session<C: ExecutionContext>(
    ctx: &C,
    registry: &ActionRegistry<C>,
    session: &Session<C::Session>,
) -> SessionError {
    loop {
        if let Err(err) = session
            .connector
            .handle_one_request(ctx, registry, &session.context)
            .await
        {
            return err;
        }
    }
}

/// Log how a session ended.
pub(crate) fn log_session_end(session_id: u32, err: &SessionError) {
    if err.is_benign() {
        info!(session_id, "session closed by peer");
        debug!(session_id, reason = %err, "session end detail");
    } else {
        error!(session_id, error = %err, "session ended with error");
    }
}

/// Run the dispose hook for a session whose peer identified itself.
///
/// Returns whether the hook ran.
pub fn dispose_session<C: ExecutionContext>(ctx: &C, session: &Session<C::Session>) -> bool {
    let Ok(mut stx) = session.context.try_borrow_mut() else {
        error!(session_id = session.id(), "session context busy during dispose");
        return false;
    };
    if !stx.is_opened() {
        debug!(session_id = session.id(), "session never opened, nothing to dispose");
        return false;
    }
    ctx.dispose(&mut stx);
    info!(
        session_id = session.id(),
        remote_pid = stx.remote_pid(),
        requests = stx.receive_count(),
        errors = stx.error_count(),
        "session disposed"
    );
    true
}

/// Runs a closure once when dropped, unless defused.
pub(crate) struct DropGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DropGuard<F> {
    pub(crate) fn new(on_drop: F) -> Self {
        Self(Some(on_drop))
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.0.take() {
            on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use symact_action::{OpenSession, OpenSessionParams};
    use symact_frame::FrameConfig;

    use super::*;

    #[derive(Default)]
    struct Ctx {
        disposed: Cell<u32>,
    }

    impl ExecutionContext for Ctx {
        type Session = ();

        fn dispose(&self, _stx: &mut SessionContext<()>) {
            self.disposed.set(self.disposed.get() + 1);
        }
    }

    fn session_pair(base: &str) -> (Rc<Session<()>>, Rc<Session<()>>) {
        let (server, client) = Connector::memory_pair(base, FrameConfig::default());
        (Rc::new(Session::new(server)), Rc::new(Session::new(client)))
    }

    #[tokio::test]
    async fn table_tracks_sessions() {
        let (a, b) = session_pair("table");
        let mut table = SessionTable::default();
        table.insert(a.clone());
        table.insert(b.clone());

        assert_eq!(table.len(), 2);
        let mut expected = vec![a.id(), b.id()];
        expected.sort_unstable();
        assert_eq!(table.ids(), expected);
        assert!(Rc::ptr_eq(&table.get(a.id()).expect("a is present"), &a));

        assert!(table.remove(a.id()).is_some());
        assert!(table.remove(a.id()).is_none());
        assert!(table.get(a.id()).is_none());

        assert_eq!(table.drain().len(), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn serve_until_peer_closes_then_dispose() {
        let (server, client) = session_pair("serve");
        let ctx = Ctx::default();
        let registry = ActionRegistry::<Ctx>::default();

        let serve = serve_session(&ctx, &registry, &server);
        let call = async {
            client
                .connector
                .dispatch::<OpenSession, _>(&client.context, &OpenSessionParams::current("t"), None)
                .await
                .expect("open should succeed");
            drop(client);
        };
        let (ended, ()) = tokio::join!(serve, call);

        assert!(ended.is_benign(), "unexpected end: {ended}");
        assert!(dispose_session(&ctx, &server));
        assert_eq!(ctx.disposed.get(), 1);
    }

    #[tokio::test]
    async fn unopened_session_is_not_disposed() {
        let (server, _client) = session_pair("unopened");
        let ctx = Ctx::default();
        assert!(!dispose_session(&ctx, &server));
        assert_eq!(ctx.disposed.get(), 0);
    }

    #[test]
    fn drop_guard_runs_once() {
        let count = Cell::new(0);
        {
            let _guard = DropGuard::new(|| count.set(count.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }
}
