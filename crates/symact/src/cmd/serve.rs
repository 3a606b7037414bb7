use std::sync::mpsc;
use std::time::Duration;

use serde_json::json;
use symact::service::{Adapter, TelemetryService};
use symact_session::{ActionServer, ServerConfig};

use crate::cmd::ServeArgs;
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    if args.reserved_instances == 0 {
        return Err(CliError::new(USAGE, "--reserved-instances must be at least 1"));
    }

    let adapters = args
        .adapters
        .iter()
        .enumerate()
        .map(|(id, name)| Adapter::named(id as u32, name.as_str()))
        .collect();
    let registry = TelemetryService::registry()
        .map_err(|err| CliError::new(INTERNAL, format!("registry setup failed: {err}")))?;
    let config = ServerConfig::new(&args.pipe)
        .with_reserved_instances(args.reserved_instances)
        .with_security(args.security);

    let server = ActionServer::start(config, TelemetryService::new(adapters), registry)
        .map_err(|err| session_error("server start failed", err))?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    print_value(
        "serve-started",
        &json!({
            "pipe": server.pipe_name(),
            "pid": std::process::id(),
            "reserved_instances": args.reserved_instances,
        }),
        format,
    );

    loop {
        match stop_rx.recv_timeout(Duration::from_secs(30)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let stats = server.stats();
                tracing::debug!(
                    sessions = stats.active,
                    waiting = stats.waiting(),
                    disposed_total = stats.disposed_total,
                    "server heartbeat"
                );
            }
        }
    }

    tracing::info!("interrupted, shutting down");
    server.shutdown();
    Ok(SUCCESS)
}
