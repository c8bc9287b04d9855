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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("SCHOOLD_WORKSPACE")
        .spawn()
        .expect("spawn schoold");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn setup_sections_defaults_and_validation() {
    let workspace = temp_dir("schoold-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "g1", "setup.get", json!({}));
    assert_eq!(setup["attendance"]["dayStatusPolicy"], "worst");
    assert_eq!(setup["attendance"]["lateCounts"], "dailyOnly");
    assert_eq!(setup["attendance"]["periodsPerDay"], 8);
    assert_eq!(setup["payments"]["maxQrUploadBytes"], 5 * 1024 * 1024);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "setup.update",
        json!({ "section": "attendance", "patch": { "dayStatusPolicy": "lastRecorded", "periodsPerDay": 6 } }),
    );
    assert_eq!(updated["values"]["periodsPerDay"], 6);

    for (i, params) in [
        json!({ "section": "attendance", "patch": { "periodsPerDay": 9 } }),
        json!({ "section": "attendance", "patch": { "lateCounts": "sometimes" } }),
        json!({ "section": "attendance", "patch": { "colour": "blue" } }),
        json!({ "section": "payments", "patch": { "maxQrUploadBytes": 10 } }),
        json!({ "section": "grading", "patch": {} }),
        json!({ "section": "payments" }),
    ]
    .into_iter()
    .enumerate()
    {
        let r = request(&mut stdin, &mut reader, &format!("bad{}", i), "setup.update", params);
        assert_eq!(error_code(&r), "bad_params", "{}", r);
    }

    let setup = request_ok(&mut stdin, &mut reader, "g2", "setup.get", json!({}));
    assert_eq!(setup["attendance"]["dayStatusPolicy"], "lastRecorded");
    assert_eq!(setup["attendance"]["periodsPerDay"], 6);
    assert_eq!(setup["attendance"]["lateCounts"], "dailyOnly");

    let month = request_ok(
        &mut stdin,
        &mut reader,
        "mo",
        "attendance.monthOpen",
        json!({ "month": "2025-02" }),
    );
    assert_eq!(month["periods"], json!(["p1", "p2", "p3", "p4", "p5", "p6"]));
    assert_eq!(month["daysInMonth"], 28);

    drop(stdin);
    let _ = child.wait();

    // Settings persist across restarts of the sidecar.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "g3", "setup.get", json!({}));
    assert_eq!(setup["attendance"]["periodsPerDay"], 6);
    drop(stdin);
    let _ = child.wait();

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn admins_create_list_and_deactivate() {
    let workspace = temp_dir("schoold-admins");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "admins.create",
        json!({ "email": "Registrar@School.edu", "name": "Registrar", "permissions": ["payments", "students"] }),
    );
    let admin_id = created["adminId"].as_str().expect("adminId").to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "a2",
        "admins.create",
        json!({ "email": "registrar@school.edu", "name": "Again" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "admins.setActive",
        json!({ "adminId": admin_id, "active": false }),
    );
    let list = request_ok(&mut stdin, &mut reader, "a4", "admins.list", json!({}));
    let admins = list["admins"].as_array().expect("admins");
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0]["email"], "registrar@school.edu");
    assert_eq!(admins[0]["isActive"], false);
    assert_eq!(admins[0]["permissions"], json!(["payments", "students"]));

    let missing = request(
        &mut stdin,
        &mut reader,
        "a5",
        "admins.setActive",
        json!({ "adminId": "nobody", "active": true }),
    );
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
