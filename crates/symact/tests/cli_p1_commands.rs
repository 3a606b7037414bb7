#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use symact_transport::{endpoint_exists, inbound_name};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/symcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

struct ServeProcess {
    child: Child,
    dir: PathBuf,
    pipe: String,
}

impl ServeProcess {
    fn start(tag: &str) -> Self {
        let dir = unique_temp_dir(tag);
        let pipe = dir.join("svc").to_string_lossy().into_owned();

        let child = Command::new(env!("CARGO_BIN_EXE_symact"))
            .args(["--log-level", "error", "--format", "json", "serve"])
            .args(["--pipe", &pipe, "--adapter", "GPU A", "--adapter", "GPU B"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !endpoint_exists(&inbound_name(&pipe)) {
            assert!(Instant::now() < deadline, "server did not come up");
            thread::sleep(Duration::from_millis(25));
        }

        Self { child, dir, pipe }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_symact"))
            .args(["--log-level", "error", "--format", "json"])
            .args(args)
            .args(["--pipe", &self.pipe])
            .output()
            .expect("command should run")
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document")
}

#[test]
fn call_enumerates_configured_adapters() {
    let server = ServeProcess::start("enum");

    let output = server.run(&["call", "EnumerateAdapters"]);
    assert!(output.status.success(), "{output:?}");

    let doc = stdout_json(&output);
    assert!(doc["schema_id"]
        .as_str()
        .expect("schema id")
        .ends_with("call-response.schema.json"));
    assert_eq!(doc["action"], "EnumerateAdapters");
    let adapters = doc["response"]["adapters"].as_array().expect("adapter list");
    assert_eq!(adapters.len(), 2);
    assert_eq!(adapters[1]["name"], "GPU B");
}

#[test]
fn out_of_range_period_exits_with_failure() {
    let server = ServeProcess::start("range");

    let output = server.run(&[
        "call",
        "SetTelemetryPeriod",
        "--params",
        r#"{"telemetry_sample_period_ms":5000}"#,
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("OUT_OF_RANGE"));

    // The failed call must not take the service down.
    let output = server.run(&[
        "call",
        "SetTelemetryPeriod",
        "--params",
        r#"{"telemetry_sample_period_ms":100}"#,
    ]);
    assert!(output.status.success(), "{output:?}");
}

#[test]
fn stream_state_is_released_when_the_caller_exits() {
    let server = ServeProcess::start("stream");

    let output = server.run(&["call", "StartStream", "--params", r#"{"target_pid":4242}"#]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout_json(&output)["response"]["shared_memory_name"],
        "symact_stream_4242"
    );

    // The calling session was disposed on exit, so its stream went with it.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let output = server.run(&["call", "GetServiceStatus"]);
        assert!(output.status.success(), "{output:?}");
        let status = stdout_json(&output);
        if status["response"]["active_streams"]
            .as_array()
            .is_some_and(|streams| streams.is_empty())
        {
            break;
        }
        assert!(Instant::now() < deadline, "stream was never released");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn unknown_action_name_is_a_usage_error() {
    let server = ServeProcess::start("unknown");

    let output = server.run(&["call", "Reboot"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("EnumerateAdapters"));
}

#[test]
fn info_reports_the_server_session() {
    let server = ServeProcess::start("info");

    let output = server.run(&["info"]);
    assert!(output.status.success(), "{output:?}");

    let doc = stdout_json(&output);
    assert!(doc["schema_id"]
        .as_str()
        .expect("schema id")
        .ends_with("connection-info.schema.json"));
    assert_eq!(doc["connected"], true);
    assert_eq!(doc["server_pid"], server.child.id());
    assert_eq!(doc["status"]["adapter_count"], 2);
}

#[test]
fn info_timeout_returns_124() {
    let dir = unique_temp_dir("missing");
    let pipe = dir.join("nobody").to_string_lossy().into_owned();

    let output = Command::new(env!("CARGO_BIN_EXE_symact"))
        .args(["info", "--pipe", &pipe, "--timeout", "300ms"])
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_symact"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("symact {}", env!("CARGO_PKG_VERSION"))
    );
}
