//! Telemetry control service: a small execution context exercising the stack.
//!
//! The service keeps one set of capture settings shared by every client.
//! Each session records what it asked for; the effective value is derived
//! from all live requests, and a departing session's requests are withdrawn
//! when it is disposed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use symact_action::{
    Action, ActionError, ActionRegistry, ActionSpec, ExecutionContext, RegistryError,
    SessionContext,
};
use tracing::{debug, info};

pub const MIN_TELEMETRY_PERIOD_MS: u32 = 1;
pub const MAX_TELEMETRY_PERIOD_MS: u32 = 1000;
/// Telemetry period while no client has requested one.
pub const DEFAULT_TELEMETRY_PERIOD_MS: u32 = 16;

const PERIOD_RANGE: RangeInclusive<u32> = MIN_TELEMETRY_PERIOD_MS..=MAX_TELEMETRY_PERIOD_MS;

/// A graphics adapter known to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adapter {
    pub id: u32,
    pub vendor: String,
    pub name: String,
    pub sustained_power_limit_w: f64,
    pub memory_size: u64,
    pub memory_max_bandwidth: u64,
}

impl Adapter {
    /// An adapter with only an id and a name.
    pub fn named(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            vendor: "unknown".to_string(),
            name: name.into(),
            sustained_power_limit_w: 0.0,
            memory_size: 0,
            memory_max_bandwidth: 0,
        }
    }
}

/// What one session has asked the service for.
#[derive(Debug, Default)]
pub struct TelemetrySession {
    pub requested_telemetry_period_ms: Option<u32>,
    pub requested_etw_flush_period_ms: Option<u32>,
    /// Target process ids this session streams.
    pub streams: BTreeSet<u32>,
}

#[derive(Debug, Default)]
struct ServiceState {
    telemetry_requests: BTreeMap<u32, u32>,
    flush_requests: BTreeMap<u32, u32>,
    /// Target pid to the sessions streaming it.
    streams: BTreeMap<u32, BTreeSet<u32>>,
    open_sessions: u32,
}

impl ServiceState {
    fn telemetry_period_ms(&self) -> u32 {
        self.telemetry_requests
            .values()
            .min()
            .copied()
            .unwrap_or(DEFAULT_TELEMETRY_PERIOD_MS)
    }

    fn etw_flush_period_ms(&self) -> Option<u32> {
        self.flush_requests.values().min().copied()
    }

    fn stop_stream(&mut self, target_pid: u32, session_id: u32) -> bool {
        let Some(clients) = self.streams.get_mut(&target_pid) else {
            return false;
        };
        let removed = clients.remove(&session_id);
        if clients.is_empty() {
            self.streams.remove(&target_pid);
        }
        removed
    }
}

/// Snapshot of the service-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub telemetry_period_ms: u32,
    pub etw_flush_period_ms: Option<u32>,
    pub active_streams: Vec<StreamStatus>,
    pub open_sessions: u32,
    pub adapter_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub target_pid: u32,
    pub clients: u32,
}

/// The telemetry service execution context.
#[derive(Debug, Default)]
pub struct TelemetryService {
    adapters: Vec<Adapter>,
    state: RefCell<ServiceState>,
}

impl TelemetryService {
    pub fn new(adapters: Vec<Adapter>) -> Self {
        Self {
            adapters,
            state: RefCell::new(ServiceState::default()),
        }
    }

    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    pub fn status(&self) -> ServiceStatus {
        let state = self.state.borrow();
        ServiceStatus {
            telemetry_period_ms: state.telemetry_period_ms(),
            etw_flush_period_ms: state.etw_flush_period_ms(),
            active_streams: state
                .streams
                .iter()
                .map(|(&target_pid, clients)| StreamStatus {
                    target_pid,
                    clients: clients.len() as u32,
                })
                .collect(),
            open_sessions: state.open_sessions,
            adapter_count: self.adapters.len() as u32,
        }
    }

    /// Registry with every telemetry action.
    pub fn registry() -> Result<ActionRegistry<Self>, RegistryError> {
        Ok(ActionRegistry::builder()
            .register::<EnumerateAdapters>()?
            .register::<SetTelemetryPeriod>()?
            .register::<SetEtwFlushPeriod>()?
            .register::<StartStream>()?
            .register::<StopStream>()?
            .register::<GetServiceStatus>()?
            .build())
    }
}

impl ExecutionContext for TelemetryService {
    type Session = TelemetrySession;

    fn on_session_opened(&self, _stx: &mut SessionContext<TelemetrySession>) {
        self.state.borrow_mut().open_sessions += 1;
    }

    fn dispose(&self, stx: &mut SessionContext<TelemetrySession>) {
        let session_id = stx.session_id();
        let mut state = self.state.borrow_mut();
        state.telemetry_requests.remove(&session_id);
        state.flush_requests.remove(&session_id);
        let streams = std::mem::take(&mut stx.app.streams);
        for &target_pid in &streams {
            state.stop_stream(target_pid, session_id);
        }
        if stx.is_opened() {
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        info!(
            session_id,
            remote_pid = stx.remote_pid(),
            streams_stopped = streams.len(),
            telemetry_period_ms = state.telemetry_period_ms(),
            "released session resources"
        );
    }
}

fn check_period(what: &str, period_ms: u32) -> Result<u32, ActionError> {
    if PERIOD_RANGE.contains(&period_ms) {
        Ok(period_ms)
    } else {
        Err(ActionError::out_of_range(format!(
            "{what} {period_ms}ms outside {MIN_TELEMETRY_PERIOD_MS}..={MAX_TELEMETRY_PERIOD_MS}"
        )))
    }
}

/// Lists the adapters the service can sample.
pub struct EnumerateAdapters;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterList {
    pub adapters: Vec<Adapter>,
}

impl ActionSpec for EnumerateAdapters {
    const IDENTIFIER: &'static str = "EnumerateAdapters";
    type Params = ();
    type Response = AdapterList;
}

impl Action<TelemetryService> for EnumerateAdapters {
    fn execute(
        ctx: &TelemetryService,
        _stx: &mut SessionContext<TelemetrySession>,
        _params: (),
    ) -> Result<AdapterList, ActionError> {
        debug!(count = ctx.adapters.len(), "adapters enumerated");
        Ok(AdapterList {
            adapters: ctx.adapters.clone(),
        })
    }
}

/// Requests a telemetry sample period. Zero withdraws the request.
pub struct SetTelemetryPeriod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPeriod {
    pub telemetry_sample_period_ms: u32,
}

impl ActionSpec for SetTelemetryPeriod {
    const IDENTIFIER: &'static str = "SetTelemetryPeriod";
    type Params = TelemetryPeriod;
    type Response = ();
}

impl Action<TelemetryService> for SetTelemetryPeriod {
    fn execute(
        ctx: &TelemetryService,
        stx: &mut SessionContext<TelemetrySession>,
        params: TelemetryPeriod,
    ) -> Result<(), ActionError> {
        let session_id = stx.session_id();
        let mut state = ctx.state.borrow_mut();
        match params.telemetry_sample_period_ms {
            0 => {
                state.telemetry_requests.remove(&session_id);
                stx.app.requested_telemetry_period_ms = None;
            }
            period => {
                let period = check_period("telemetry period", period)?;
                state.telemetry_requests.insert(session_id, period);
                stx.app.requested_telemetry_period_ms = Some(period);
            }
        }
        debug!(
            session_id,
            remote_pid = stx.remote_pid(),
            requested = params.telemetry_sample_period_ms,
            effective = state.telemetry_period_ms(),
            "telemetry period requested"
        );
        Ok(())
    }
}

/// Requests a manual ETW flush period. `None` withdraws the request.
pub struct SetEtwFlushPeriod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtwFlushPeriod {
    pub etw_flush_period_ms: Option<u32>,
}

impl ActionSpec for SetEtwFlushPeriod {
    const IDENTIFIER: &'static str = "SetEtwFlushPeriod";
    type Params = EtwFlushPeriod;
    type Response = ();
}

impl Action<TelemetryService> for SetEtwFlushPeriod {
    fn execute(
        ctx: &TelemetryService,
        stx: &mut SessionContext<TelemetrySession>,
        params: EtwFlushPeriod,
    ) -> Result<(), ActionError> {
        let session_id = stx.session_id();
        let requested = params
            .etw_flush_period_ms
            .map(|period| check_period("ETW flush period", period))
            .transpose()?;

        let mut state = ctx.state.borrow_mut();
        match requested {
            Some(period) => {
                state.flush_requests.insert(session_id, period);
            }
            None => {
                state.flush_requests.remove(&session_id);
            }
        }
        stx.app.requested_etw_flush_period_ms = requested;
        debug!(session_id, ?requested, "ETW flush period requested");
        Ok(())
    }
}

/// Target of a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub target_pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStarted {
    pub target_pid: u32,
    /// Name of the shared memory segment frames are published to.
    pub shared_memory_name: String,
}

/// Starts streaming frame data for a target process.
pub struct StartStream;

impl ActionSpec for StartStream {
    const IDENTIFIER: &'static str = "StartStream";
    type Params = StreamTarget;
    type Response = StreamStarted;
}

impl Action<TelemetryService> for StartStream {
    fn execute(
        ctx: &TelemetryService,
        stx: &mut SessionContext<TelemetrySession>,
        params: StreamTarget,
    ) -> Result<StreamStarted, ActionError> {
        let target_pid = params.target_pid;
        if target_pid == 0 {
            return Err(ActionError::invalid_params("target pid must be nonzero"));
        }
        if !stx.app.streams.insert(target_pid) {
            return Err(ActionError::invalid_params(format!(
                "already streaming process {target_pid}"
            )));
        }
        let session_id = stx.session_id();
        ctx.state
            .borrow_mut()
            .streams
            .entry(target_pid)
            .or_default()
            .insert(session_id);
        info!(session_id, target_pid, "stream started");
        Ok(StreamStarted {
            target_pid,
            shared_memory_name: format!("symact_stream_{target_pid}"),
        })
    }
}

/// Stops a stream started by this session.
pub struct StopStream;

impl ActionSpec for StopStream {
    const IDENTIFIER: &'static str = "StopStream";
    type Params = StreamTarget;
    type Response = ();
}

impl Action<TelemetryService> for StopStream {
    fn execute(
        ctx: &TelemetryService,
        stx: &mut SessionContext<TelemetrySession>,
        params: StreamTarget,
    ) -> Result<(), ActionError> {
        let target_pid = params.target_pid;
        if !stx.app.streams.remove(&target_pid) {
            return Err(ActionError::invalid_params(format!(
                "no stream for process {target_pid}"
            )));
        }
        let session_id = stx.session_id();
        ctx.state.borrow_mut().stop_stream(target_pid, session_id);
        info!(session_id, target_pid, "stream stopped");
        Ok(())
    }
}

/// Reports the effective service-wide settings.
pub struct GetServiceStatus;

impl ActionSpec for GetServiceStatus {
    const IDENTIFIER: &'static str = "GetServiceStatus";
    type Params = ();
    type Response = ServiceStatus;
}

impl Action<TelemetryService> for GetServiceStatus {
    fn execute(
        ctx: &TelemetryService,
        _stx: &mut SessionContext<TelemetrySession>,
        _params: (),
    ) -> Result<ServiceStatus, ActionError> {
        Ok(ctx.status())
    }
}

/// Client side context for talking to a [`TelemetryService`].
///
/// Serves nothing beyond the built-in actions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlClient;

impl ExecutionContext for ControlClient {
    type Session = ();
}

#[cfg(test)]
mod tests {
    use symact_action::{OpenSession, OpenSessionParams};
    use symact_frame::status;

    use super::*;

    fn opened(ctx: &TelemetryService, session_id: u32) -> SessionContext<TelemetrySession> {
        let mut stx = SessionContext::new(session_id);
        stx.set_remote(1000 + session_id, "test");
        ctx.on_session_opened(&mut stx);
        stx
    }

    fn set_period(
        ctx: &TelemetryService,
        stx: &mut SessionContext<TelemetrySession>,
        period: u32,
    ) -> Result<(), ActionError> {
        SetTelemetryPeriod::execute(
            ctx,
            stx,
            TelemetryPeriod {
                telemetry_sample_period_ms: period,
            },
        )
    }

    #[test]
    fn effective_period_is_minimum_request() {
        let ctx = TelemetryService::default();
        let mut a = opened(&ctx, 1);
        let mut b = opened(&ctx, 2);
        assert_eq!(ctx.status().telemetry_period_ms, DEFAULT_TELEMETRY_PERIOD_MS);

        set_period(&ctx, &mut a, 100).expect("valid period");
        set_period(&ctx, &mut b, 40).expect("valid period");
        assert_eq!(ctx.status().telemetry_period_ms, 40);
        assert_eq!(b.app.requested_telemetry_period_ms, Some(40));

        set_period(&ctx, &mut b, 0).expect("zero withdraws");
        assert_eq!(ctx.status().telemetry_period_ms, 100);
        assert_eq!(b.app.requested_telemetry_period_ms, None);
    }

    #[test]
    fn period_out_of_range_is_rejected() {
        let ctx = TelemetryService::default();
        let mut stx = opened(&ctx, 1);
        let err = set_period(&ctx, &mut stx, MAX_TELEMETRY_PERIOD_MS + 1)
            .expect_err("too long");
        assert_eq!(err.status(), status::OUT_OF_RANGE);
        assert_eq!(stx.app.requested_telemetry_period_ms, None);
        set_period(&ctx, &mut stx, MAX_TELEMETRY_PERIOD_MS).expect("upper bound is valid");
    }

    #[test]
    fn etw_flush_period_validates_and_clears() {
        let ctx = TelemetryService::default();
        let mut stx = opened(&ctx, 1);

        let err = SetEtwFlushPeriod::execute(
            &ctx,
            &mut stx,
            EtwFlushPeriod {
                etw_flush_period_ms: Some(0),
            },
        )
        .expect_err("zero flush period");
        assert_eq!(err.status(), status::OUT_OF_RANGE);

        SetEtwFlushPeriod::execute(
            &ctx,
            &mut stx,
            EtwFlushPeriod {
                etw_flush_period_ms: Some(8),
            },
        )
        .expect("valid flush period");
        assert_eq!(ctx.status().etw_flush_period_ms, Some(8));

        SetEtwFlushPeriod::execute(
            &ctx,
            &mut stx,
            EtwFlushPeriod {
                etw_flush_period_ms: None,
            },
        )
        .expect("clearing always works");
        assert_eq!(ctx.status().etw_flush_period_ms, None);
        assert_eq!(stx.app.requested_etw_flush_period_ms, None);
    }

    #[test]
    fn streams_are_tracked_per_session() {
        let ctx = TelemetryService::default();
        let mut a = opened(&ctx, 1);
        let mut b = opened(&ctx, 2);
        let target = StreamTarget { target_pid: 4242 };

        let started = StartStream::execute(&ctx, &mut a, target).expect("start");
        assert_eq!(started.shared_memory_name, "symact_stream_4242");
        StartStream::execute(&ctx, &mut b, target).expect("second client may stream too");
        let again = StartStream::execute(&ctx, &mut a, target).expect_err("duplicate start");
        assert_eq!(again.status(), status::INVALID_PARAMS);

        assert_eq!(
            ctx.status().active_streams,
            vec![StreamStatus {
                target_pid: 4242,
                clients: 2
            }]
        );

        StopStream::execute(&ctx, &mut a, target).expect("stop");
        let err = StopStream::execute(&ctx, &mut a, target).expect_err("already stopped");
        assert_eq!(err.status(), status::INVALID_PARAMS);
        assert_eq!(ctx.status().active_streams[0].clients, 1);
    }

    #[test]
    fn zero_target_pid_is_invalid() {
        let ctx = TelemetryService::default();
        let mut stx = opened(&ctx, 1);
        let err = StartStream::execute(&ctx, &mut stx, StreamTarget { target_pid: 0 })
            .expect_err("pid zero");
        assert_eq!(err.status(), status::INVALID_PARAMS);
        assert!(stx.app.streams.is_empty());
    }

    #[test]
    fn dispose_withdraws_session_requests() {
        let ctx = TelemetryService::new(vec![Adapter::named(0, "Test GPU")]);
        let mut a = opened(&ctx, 1);
        let mut b = opened(&ctx, 2);
        set_period(&ctx, &mut a, 5).expect("valid period");
        set_period(&ctx, &mut b, 50).expect("valid period");
        StartStream::execute(&ctx, &mut a, StreamTarget { target_pid: 7 }).expect("start");
        assert_eq!(ctx.status().open_sessions, 2);

        ctx.dispose(&mut a);

        let status = ctx.status();
        assert_eq!(status.telemetry_period_ms, 50);
        assert!(status.active_streams.is_empty());
        assert_eq!(status.open_sessions, 1);
        assert_eq!(status.adapter_count, 1);
        assert!(a.app.streams.is_empty());
    }

    #[test]
    fn repeated_open_counts_session_once() {
        let ctx = TelemetryService::new(vec![Adapter::named(0, "Test GPU")]);
        let mut stx = SessionContext::new(1);
        for _ in 0..2 {
            <OpenSession as Action<TelemetryService>>::execute(
                &ctx,
                &mut stx,
                OpenSessionParams::current("test"),
            )
            .expect("open");
        }
        assert_eq!(ctx.status().open_sessions, 1);

        // A session that never opened does not take the count down.
        ctx.dispose(&mut SessionContext::new(2));
        assert_eq!(ctx.status().open_sessions, 1);

        ctx.dispose(&mut stx);
        assert_eq!(ctx.status().open_sessions, 0);
    }

    #[test]
    fn enumerate_returns_configured_adapters() {
        let ctx = TelemetryService::new(vec![Adapter::named(0, "A"), Adapter::named(1, "B")]);
        let mut stx = opened(&ctx, 1);
        let list = EnumerateAdapters::execute(&ctx, &mut stx, ()).expect("enumerate");
        assert_eq!(list.adapters.len(), 2);
        assert_eq!(list.adapters[1].name, "B");
    }

    #[test]
    fn registry_serves_every_action() {
        let registry = TelemetryService::registry().expect("registry should build");
        assert_eq!(
            registry.identifiers(),
            vec![
                "EnumerateAdapters",
                "GetServiceStatus",
                "OpenSession",
                "SetEtwFlushPeriod",
                "SetTelemetryPeriod",
                "StartStream",
                "StopStream",
            ]
        );
    }
}
