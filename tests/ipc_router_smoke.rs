use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_kardexd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kardexd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

#[test]
fn health_unknown_method_and_workspace_gate() {
    let workspace = temp_dir("kardex-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));
    let result = health.get("result").expect("health result");
    assert!(result.get("version").and_then(|v| v.as_str()).is_some());
    assert!(result.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let gated = request(&mut stdin, &mut reader, "2", "groups.list", json!({}));
    assert_eq!(gated.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        gated
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let unknown = request(&mut stdin, &mut reader, "3", "does.notExist", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    let selected = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected.get("ok").and_then(|v| v.as_bool()), Some(true));

    let health2 = request(&mut stdin, &mut reader, "5", "health", json!({}));
    let path = health2
        .get("result")
        .and_then(|r| r.get("workspacePath"))
        .and_then(|v| v.as_str())
        .expect("workspacePath after select");
    assert_eq!(path, workspace.to_string_lossy());
}
