use std::time::{Duration, Instant};

/// Per-session state shared by the protocol engine and the actions it runs.
///
/// Bookkeeping is updated by the connector through the `record_*`/`take_*`
/// methods; actions read it and own the application value in [`app`].
///
/// [`app`]: SessionContext::app
#[derive(Debug)]
pub struct SessionContext<S> {
    session_id: u32,
    remote_pid: Option<u32>,
    remote_build_id: Option<String>,
    last_token_seen: Option<u32>,
    next_command_token: u32,
    receive_count: u64,
    error_count: u64,
    last_received_at: Option<Instant>,
    /// Application state for this session.
    pub app: S,
}

impl<S: Default> SessionContext<S> {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            remote_pid: None,
            remote_build_id: None,
            last_token_seen: None,
            next_command_token: 0,
            receive_count: 0,
            error_count: 0,
            last_received_at: None,
            app: S::default(),
        }
    }
}

impl<S> SessionContext<S> {
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Process id announced by the peer in `OpenSession`.
    pub fn remote_pid(&self) -> Option<u32> {
        self.remote_pid
    }

    pub fn remote_build_id(&self) -> Option<&str> {
        self.remote_build_id.as_deref()
    }

    /// True once the peer has identified itself.
    pub fn is_opened(&self) -> bool {
        self.remote_pid.is_some()
    }

    pub fn last_token_seen(&self) -> Option<u32> {
        self.last_token_seen
    }

    /// Token the next outgoing request will carry.
    pub fn next_command_token(&self) -> u32 {
        self.next_command_token
    }

    pub fn receive_count(&self) -> u64 {
        self.receive_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Time since the last request arrived, if any did.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_received_at.map(|at| at.elapsed())
    }

    /// Note an incoming request carrying `command_token`.
    pub fn record_request(&mut self, command_token: u32) {
        self.last_token_seen = Some(command_token);
        self.receive_count += 1;
        self.last_received_at = Some(Instant::now());
    }

    /// Note a request that failed.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Claim the token for an outgoing request. Tokens increase by one per call.
    pub fn take_command_token(&mut self) -> u32 {
        let token = self.next_command_token;
        self.next_command_token = self.next_command_token.wrapping_add(1);
        token
    }

    /// Record the identity announced by the peer.
    pub fn set_remote(&mut self, pid: u32, build_id: impl Into<String>) {
        self.remote_pid = Some(pid);
        self.remote_build_id = Some(build_id.into());
    }
}
