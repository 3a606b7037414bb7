use std::time::Duration;

use clap::{Args, Subcommand};
use symact::service::ControlClient;
use symact::transport::PipeSecurity;
use symact_action::ActionRegistry;
use symact_session::{
    ActionClient, ClientConfig, DEFAULT_PIPE_NAME, DEFAULT_RESERVED_INSTANCES,
};

use crate::exit::{session_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod info;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the telemetry control service until interrupted.
    Serve(ServeArgs),
    /// Dispatch one action to a running service.
    Call(CallArgs),
    /// Open a session and print what the server announces.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Base pipe name.
    #[arg(long, env = "SYMACT_PIPE", default_value = DEFAULT_PIPE_NAME)]
    pub pipe: String,
    /// Session slots kept waiting for clients.
    #[arg(long, env = "SYMACT_RESERVED_INSTANCES", default_value_t = DEFAULT_RESERVED_INSTANCES)]
    pub reserved_instances: usize,
    /// Pipe access policy: default, current-user, everyone, sddl:<descriptor>.
    #[arg(long, default_value = "default")]
    pub security: PipeSecurity,
    /// Adapter names to report (repeatable).
    #[arg(long = "adapter", value_name = "NAME")]
    pub adapters: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Action identifier (e.g. EnumerateAdapters, SetTelemetryPeriod).
    pub action: String,
    /// Base pipe name.
    #[arg(long, env = "SYMACT_PIPE", default_value = DEFAULT_PIPE_NAME)]
    pub pipe: String,
    /// Action parameters as JSON.
    #[arg(long, value_name = "JSON")]
    pub params: Option<String>,
    /// Connect and response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Base pipe name.
    #[arg(long, env = "SYMACT_PIPE", default_value = DEFAULT_PIPE_NAME)]
    pub pipe: String,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open a session with the service at `pipe`.
pub fn connect(pipe: &str, timeout: Duration) -> CliResult<ActionClient<ControlClient>> {
    let config = ClientConfig::new(pipe)
        .with_connect_timeout(timeout)
        .with_dispatch_timeout(Some(timeout));
    ActionClient::connect(config, ControlClient, ActionRegistry::default())
        .map_err(|err| session_error("connect failed", err))
}

/// Parse `500ms`, `5s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s").expect("valid"), Duration::from_secs(5));
        assert_eq!(parse_duration("2").expect("valid"), Duration::from_secs(2));
    }

    #[test]
    fn parse_duration_millis() {
        assert_eq!(
            parse_duration("150ms").expect("valid"),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }
}
