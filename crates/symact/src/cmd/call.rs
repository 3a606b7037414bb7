use serde_json::{json, Value};
use symact::service::{
    ControlClient, EnumerateAdapters, GetServiceStatus, SetEtwFlushPeriod, SetTelemetryPeriod,
    StartStream, StopStream,
};
use symact_action::ActionSpec;
use symact_session::ActionClient;

use crate::cmd::{connect, parse_duration, CallArgs};
use crate::exit::{session_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

type CallFn = fn(&ActionClient<ControlClient>, Value) -> CliResult<Value>;

const ACTION_NAMES: [&str; 6] = [
    EnumerateAdapters::IDENTIFIER,
    SetTelemetryPeriod::IDENTIFIER,
    SetEtwFlushPeriod::IDENTIFIER,
    StartStream::IDENTIFIER,
    StopStream::IDENTIFIER,
    GetServiceStatus::IDENTIFIER,
];

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let call = lookup(&args.action).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!(
                "unknown action '{}' (expected one of: {})",
                args.action,
                ACTION_NAMES.join(", ")
            ),
        )
    })?;
    let params = parse_params(args.params.as_deref())?;
    let timeout = parse_duration(&args.timeout)?;

    let client = connect(&args.pipe, timeout)?;
    let response = call(&client, params)?;
    client.shutdown();

    print_value(
        "call-response",
        &json!({
            "action": args.action,
            "response": response,
        }),
        format,
    );
    Ok(SUCCESS)
}

fn lookup(action: &str) -> Option<CallFn> {
    let call: CallFn = match action {
        EnumerateAdapters::IDENTIFIER => call_json::<EnumerateAdapters>,
        SetTelemetryPeriod::IDENTIFIER => call_json::<SetTelemetryPeriod>,
        SetEtwFlushPeriod::IDENTIFIER => call_json::<SetEtwFlushPeriod>,
        StartStream::IDENTIFIER => call_json::<StartStream>,
        StopStream::IDENTIFIER => call_json::<StopStream>,
        GetServiceStatus::IDENTIFIER => call_json::<GetServiceStatus>,
        _ => return None,
    };
    Some(call)
}

fn parse_params(input: Option<&str>) -> CliResult<Value> {
    match input {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}"))),
    }
}

fn call_json<A: ActionSpec>(client: &ActionClient<ControlClient>, params: Value) -> CliResult<Value> {
    let params: A::Params = serde_json::from_value(params).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid params for {}: {err}", A::IDENTIFIER),
        )
    })?;
    let response = client
        .dispatch_sync::<A>(params)
        .map_err(|err| session_error("call failed", err))?;
    serde_json::to_value(response)
        .map_err(|err| CliError::new(INTERNAL, format!("response encoding failed: {err}")))
}
