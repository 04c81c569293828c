#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serial_test::serial;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[&str]) -> ResponseTemplate {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(chunk);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn run_session(home: &Path, base_url: &str, input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_neurocode"))
        .current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env("NEUROCODE_BASE_URL", base_url)
        .env("NEUROCODE_MODEL", "test-model")
        .env("NEUROCODE_PYTHON", "sh")
        .env_remove("NEUROCODE_DATABASE")
        .env_remove("NEUROCODE_API_KEY")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn neurocode");

    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait for neurocode")
}

fn read_trace_file(home: &Path) -> String {
    let dir = home.join("state/neurocode/traces");
    let entry = fs::read_dir(&dir)
        .expect("trace dir")
        .map(|entry| entry.expect("dir entry").path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("session-") && name.ends_with(".log"))
        })
        .expect("session trace file");
    fs::read_to_string(entry).expect("read trace")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
#[serial]
fn plain_text_turn_streams_and_is_traced() {
    let rt = Runtime::new().expect("runtime");
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(sse(&[
                r#"{"choices":[{"delta":{"content":"Hello from "}}]}"#,
                r#"{"choices":[{"delta":{"content":"NeuroCode."}}]}"#,
            ]))
            .expect(1)
            .mount(&server),
    );

    let home = TempDir::new().expect("tempdir");
    let output = run_session(
        home.path(),
        &format!("{}/v1", server.uri()),
        "hi there\n/history\nexit\n",
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("Hello from NeuroCode.\n"), "got: {text}");
    assert!(text.contains("you: hi there\n"), "got: {text}");
    assert!(text.contains("neurocode: Hello from NeuroCode.\n"), "got: {text}");

    let trace = read_trace_file(home.path());
    assert!(trace.contains("[user.in    ] hi there"), "trace: {trace}");
    assert!(trace.contains("ai.text"), "trace: {trace}");

    rt.block_on(server.verify());
}

#[test]
#[serial]
fn productivity_tool_call_runs_follow_up() {
    let rt = Runtime::new().expect("runtime");
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("\"tools\""))
            .respond_with(sse(&[
                r#"{"choices":[{"delta":{"content":"Logging that."}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"update_productivity","arguments":"{\"focus_time\": 30,"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":" \"tasks_completed\": 2}"}}]}}]}"#,
            ]))
            .expect(1)
            .mount(&server),
    );
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("\"role\":\"function\""))
            .respond_with(sse(&[r#"{"choices":[{"delta":{"content":"Great focus today!"}}]}"#]))
            .expect(1)
            .mount(&server),
    );

    let home = TempDir::new().expect("tempdir");
    let output = run_session(
        home.path(),
        &format!("{}/v1", server.uri()),
        "I focused for 30 minutes and finished 2 tasks\n/report 1\nquit\n",
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("Logging that."), "got: {text}");
    assert!(
        text.contains("Productivity updated: Focus time 30 minutes, 2 tasks completed.\n"),
        "got: {text}"
    );
    assert!(text.contains("Great focus today!"), "got: {text}");
    assert!(text.contains("focus   30 min  tasks   2  (1 entry)"), "got: {text}");

    let trace = read_trace_file(home.path());
    assert!(trace.contains("tool.call"), "trace: {trace}");
    assert!(trace.contains("tool.status"), "trace: {trace}");

    rt.block_on(server.verify());
}

#[test]
#[serial]
fn unreachable_model_reports_and_keeps_history_clean() {
    let home = TempDir::new().expect("tempdir");
    let output = run_session(home.path(), "http://127.0.0.1:9/v1", "hello?\n/history\nexit\n");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(
        text.contains("Sorry, I'm having trouble connecting to my language model. Error: "),
        "got: {text}"
    );
    assert!(text.contains("(no messages yet)"), "got: {text}");
}

#[test]
#[serial]
fn eof_ends_the_session() {
    let home = TempDir::new().expect("tempdir");
    let output = run_session(home.path(), "http://127.0.0.1:9/v1", "");
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("NeuroCode is ready."));
}
