use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use symact::service::{GetServiceStatus, ServiceStatus};

use crate::cmd::{connect, parse_duration, InfoArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    pipe: String,
    session_id: u32,
    server_pid: u32,
    server_build_id: String,
    connect_ms: f64,
    ping_latency_ms: f64,
    status: ServiceStatus,
    connected: bool,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let started = Instant::now();
    let client = connect(&args.pipe, timeout)?;
    let connect_ms = round_ms(started.elapsed().as_secs_f64());

    let ping = Instant::now();
    let status = client
        .dispatch_sync::<GetServiceStatus>(())
        .map_err(|err| session_error("status request failed", err))?;
    let ping_latency_ms = round_ms(ping.elapsed().as_secs_f64());

    let out = InfoOutput {
        pipe: client.pipe_name().to_string(),
        session_id: client.session_id(),
        server_pid: client.server_pid(),
        server_build_id: client.server_build_id().to_string(),
        connect_ms,
        ping_latency_ms,
        status,
        connected: client.is_connected(),
    };
    client.shutdown();

    match format {
        OutputFormat::Raw => println!("{}", out.server_pid),
        _ => {
            let value = serde_json::to_value(&out).unwrap_or(Value::Null);
            print_value("connection-info", &value, format);
        }
    }
    Ok(SUCCESS)
}

fn round_ms(secs: f64) -> f64 {
    (secs * 1000.0 * 100.0).round() / 100.0
}
