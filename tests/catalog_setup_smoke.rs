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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn periods_and_subjects_lifecycle() {
    let workspace = temp_dir("kardex-catalog");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let period = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "periods.create",
        json!({ "name": "2026-1", "startDate": "2026-01-26", "endDate": "2026-06-12" }),
    );
    let period_id = period
        .get("periodId")
        .and_then(|v| v.as_str())
        .expect("periodId")
        .to_string();

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Programación", "code": "SCD-1027", "semester": 3 }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let listed = request_ok(&mut stdin, &mut reader, "4", "periods.list", json!({}));
    let periods = listed
        .get("periods")
        .and_then(|v| v.as_array())
        .expect("periods");
    assert_eq!(periods.len(), 1);
    assert_eq!(
        periods[0].get("name").and_then(|v| v.as_str()),
        Some("2026-1")
    );
    assert_eq!(periods[0].get("active").and_then(|v| v.as_bool()), Some(true));

    let listed = request_ok(&mut stdin, &mut reader, "5", "subjects.list", json!({}));
    let subjects = listed
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(
        subjects[0].get("code").and_then(|v| v.as_str()),
        Some("SCD-1027")
    );

    // A group pins both catalog rows in place.
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "groups.create",
        json!({ "periodId": period_id, "groupNumber": 1, "subjectId": subject_id }),
    );
    let group_id = group
        .get("groupId")
        .and_then(|v| v.as_str())
        .expect("groupId")
        .to_string();

    let refused = request(
        &mut stdin,
        &mut reader,
        "7",
        "periods.delete",
        json!({ "periodId": period_id }),
    );
    assert_eq!(refused.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&refused), Some("in_use"));

    let refused = request(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(error_code(&refused), Some("in_use"));

    // An unfiltered list and a period-filtered list both find the group.
    let all = request_ok(&mut stdin, &mut reader, "9", "groups.list", json!({}));
    assert_eq!(
        all.get("groups").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "groups.list",
        json!({ "periodId": period_id }),
    );
    let groups = filtered
        .get("groups")
        .and_then(|v| v.as_array())
        .expect("groups");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].get("id").and_then(|v| v.as_str()), Some(group_id.as_str()));

    let other_period = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "periods.create",
        json!({ "name": "2026-2" }),
    );
    let other_period_id = other_period
        .get("periodId")
        .and_then(|v| v.as_str())
        .expect("periodId")
        .to_string();
    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "groups.list",
        json!({ "periodId": other_period_id }),
    );
    assert_eq!(
        filtered
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // Unreferenced rows delete cleanly.
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "periods.delete",
        json!({ "periodId": other_period_id }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_bool()), Some(true));

    let missing = request(
        &mut stdin,
        &mut reader,
        "14",
        "periods.delete",
        json!({ "periodId": other_period_id }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));
}

#[test]
fn groups_create_validates_catalog_references() {
    let workspace = temp_dir("kardex-catalog-refs");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "groups.create",
        json!({ "periodId": "no-such-period", "groupNumber": 1 }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("not_found"));

    let period = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "periods.create",
        json!({ "name": "2026-1" }),
    );
    let period_id = period.get("periodId").and_then(|v| v.as_str()).expect("periodId");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({ "periodId": period_id, "groupNumber": 1, "subjectId": "no-such-subject" }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "groups.create",
        json!({ "periodId": period_id, "groupNumber": 0 }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));
}

#[test]
fn set_units_rejects_bad_structure_without_touching_it() {
    let workspace = temp_dir("kardex-catalog-units");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let period = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "periods.create",
        json!({ "name": "2026-1" }),
    );
    let period_id = period.get("periodId").and_then(|v| v.as_str()).expect("periodId");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({ "periodId": period_id, "groupNumber": 1 }),
    );
    let group_id = group
        .get("groupId")
        .and_then(|v| v.as_str())
        .expect("groupId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.setUnits",
        json!({
            "groupId": group_id,
            "units": [{ "unidad": 1, "actividades": [{ "nombre": "Examen", "porcentaje": 100 }] }]
        }),
    );

    for (id, bad_units) in [
        ("5", json!([{ "unidad": 0, "actividades": [] }])),
        (
            "6",
            json!([
                { "unidad": 1, "actividades": [] },
                { "unidad": 1, "actividades": [] }
            ]),
        ),
        (
            "7",
            json!([{ "unidad": 1, "actividades": [
                { "nombre": "Examen", "porcentaje": 50 },
                { "nombre": "Examen", "porcentaje": 50 }
            ]}]),
        ),
        (
            "8",
            json!([{ "unidad": 1, "actividades": [
                { "nombre": "", "porcentaje": 50 }
            ]}]),
        ),
        (
            "9",
            json!([{ "unidad": 1, "actividades": [
                { "nombre": "Examen", "porcentaje": -1 }
            ]}]),
        ),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "groups.setUnits",
            json!({ "groupId": group_id, "units": bad_units }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "units: {}", bad_units);
    }

    // The rejected payloads never replaced the stored structure.
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "groups.get",
        json!({ "groupId": group_id }),
    );
    let unidades = got
        .pointer("/group/unidades")
        .and_then(|v| v.as_array())
        .expect("unidades");
    assert_eq!(unidades.len(), 1);
    assert_eq!(
        unidades[0].pointer("/actividades/0/nombre").and_then(|v| v.as_str()),
        Some("Examen")
    );
}
