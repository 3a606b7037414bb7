use std::time::Duration;

use symact_frame::FrameConfig;
use symact_transport::PipeSecurity;

/// Base pipe name used when none is configured.
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\symact";

/// Default number of session slots kept accepting.
pub const DEFAULT_RESERVED_INSTANCES: usize = 3;

/// Configuration for [`ActionServer`](crate::ActionServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base pipe name; sessions use `<base>-in` and `<base>-out`.
    pub pipe_name: String,
    /// Session slots kept ready for new clients. Must be at least 1.
    ///
    /// Slots take turns creating pipe instances, so at most one instance
    /// pair exists at a time no matter how many slots are reserved. This
    /// bounds how many sessions run at once, not how many accept in
    /// parallel. A client that arrives while the pair is taken sees the pipe
    /// as busy or absent until the next slot creates one, and gets in
    /// through the connect retry of [`ClientConfig::connect_timeout`].
    pub reserved_instances: usize,
    /// Access policy for created pipe instances.
    pub security: PipeSecurity,
    /// Packet limits and default I/O deadlines.
    pub frame: FrameConfig,
    /// Pause before retrying after a pipe instance could not be created.
    pub create_retry_delay: Duration,
    /// Abort the process when the event loop itself fails.
    pub fatal_exit: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            reserved_instances: DEFAULT_RESERVED_INSTANCES,
            security: PipeSecurity::Default,
            frame: FrameConfig::default(),
            create_retry_delay: Duration::from_millis(250),
            fatal_exit: true,
        }
    }
}

impl ServerConfig {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            ..Self::default()
        }
    }

    pub fn with_reserved_instances(mut self, reserved_instances: usize) -> Self {
        self.reserved_instances = reserved_instances;
        self
    }

    pub fn with_security(mut self, security: PipeSecurity) -> Self {
        self.security = security;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_create_retry_delay(mut self, delay: Duration) -> Self {
        self.create_retry_delay = delay;
        self
    }

    pub fn with_fatal_exit(mut self, fatal_exit: bool) -> Self {
        self.fatal_exit = fatal_exit;
        self
    }
}

/// Configuration for [`ActionClient`](crate::ActionClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base pipe name of the server.
    pub pipe_name: String,
    /// How long to keep retrying while no server instance is available.
    pub connect_timeout: Duration,
    /// Packet limits and default I/O deadlines.
    pub frame: FrameConfig,
    /// Deadline for each dispatched request. `None` waits indefinitely.
    pub dispatch_timeout: Option<Duration>,
    /// Abort the process when the event loop itself fails.
    pub fatal_exit: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            connect_timeout: Duration::from_secs(5),
            frame: FrameConfig::default(),
            dispatch_timeout: None,
            fatal_exit: true,
        }
    }
}

impl ClientConfig {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_fatal_exit(mut self, fatal_exit: bool) -> Self {
        self.fatal_exit = fatal_exit;
        self
    }
}

/// Thread name for an orchestrator worker, derived from its base pipe name.
pub(crate) fn worker_thread_name(pipe_name: &str, role: &str) -> String {
    let short = symact_transport::short_name(pipe_name);
    let base = short.rsplit(['/', '\\']).next().unwrap_or(short);
    format!("symact-{base}-{role}")
}
