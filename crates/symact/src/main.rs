mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "symact", version, about = "Symmetric action service CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "symact",
            "serve",
            "--pipe",
            "/tmp/symact-test/svc",
            "--reserved-instances",
            "2",
            "--adapter",
            "GPU A",
            "--adapter",
            "GPU B",
        ])
        .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.reserved_instances, 2);
                assert_eq!(args.adapters, vec!["GPU A", "GPU B"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "symact",
            "call",
            "SetTelemetryPeriod",
            "--params",
            r#"{"telemetry_sample_period_ms":100}"#,
            "--timeout",
            "500ms",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.action, "SetTelemetryPeriod");
                assert!(args.params.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn call_requires_an_action() {
        let err = Cli::try_parse_from(["symact", "call"]).expect_err("missing action");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_info_subcommand() {
        let cli = Cli::try_parse_from(["symact", "info", "--timeout", "3s", "--format", "json"])
            .expect("info args should parse");
        assert!(matches!(cli.command, Command::Info(_)));
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }
}
