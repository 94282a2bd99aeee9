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
    let exe = env!("CARGO_BIN_EXE_epointyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn epointyd");
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
    token: Option<&str>,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(token) = token {
        payload["token"] = json!(token);
    }
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
    token: Option<&str>,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params, token);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    token: Option<&str>,
) -> String {
    let value = request(stdin, reader, id, method, params, token);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    email: &str,
    password: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "email": email, "password": password }),
        None,
    );
    result
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

#[test]
fn scan_resolution_hits_misses_and_gates() {
    let workspace = temp_dir("epointyd-scan");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.bootstrap",
        json!({
            "fullName": "Alice Admin",
            "email": "admin@school.test",
            "password": "admin-pw-1"
        }),
        None,
    );
    let admin_token = login(&mut stdin, &mut reader, "3", "admin@school.test", "admin-pw-1");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "fullName": "Paul Prof",
            "email": "paul@school.test",
            "role": "PROF",
            "password": "prof-pw-123!"
        }),
        Some(&admin_token),
    );
    let prof_token = login(&mut stdin, &mut reader, "5", "paul@school.test", "prof-pw-123!");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({
            "fullName": "Sami Student",
            "email": "sami@school.test",
            "major": "Informatique",
            "level": "L2",
            "password": "stud-pw-1!"
        }),
        Some(&admin_token),
    );
    let scan_id = student
        .pointer("/student/scanId")
        .and_then(|v| v.as_str())
        .expect("scan id")
        .to_string();
    let student_token = login(&mut stdin, &mut reader, "7", "sami@school.test", "stud-pw-1!");

    // Hit: the profile snapshot comes back with a timestamp.
    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "scan.student",
        json!({ "scanId": scan_id }),
        Some(&prof_token),
    );
    assert_eq!(hit.get("valid").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        hit.pointer("/student/name").and_then(|v| v.as_str()),
        Some("Sami Student")
    );
    assert_eq!(
        hit.pointer("/student/major").and_then(|v| v.as_str()),
        Some("Informatique")
    );
    assert_eq!(
        hit.pointer("/student/paymentStatus").and_then(|v| v.as_str()),
        Some("PENDING")
    );
    assert!(hit.get("timestamp").and_then(|v| v.as_str()).is_some());

    // Miss is a normal ok outcome, same timestamp shape, never an error.
    let miss = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scan.student",
        json!({ "scanId": "not-a-real-code" }),
        Some(&prof_token),
    );
    assert_eq!(miss.get("valid").and_then(|v| v.as_bool()), Some(false));
    assert!(miss.get("message").and_then(|v| v.as_str()).is_some());
    assert!(miss.get("timestamp").and_then(|v| v.as_str()).is_some());

    // Matching is exact and case-sensitive.
    let cased = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "scan.student",
        json!({ "scanId": scan_id.to_uppercase() }),
        Some(&prof_token),
    );
    assert_eq!(cased.get("valid").and_then(|v| v.as_bool()), Some(false));

    // The scanner feature itself is gated on role, before any course exists.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "scan.student",
        json!({ "scanId": scan_id }),
        Some(&student_token),
    );
    assert_eq!(code, "forbidden");

    // Admins may scan too.
    let admin_hit = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "scan.student",
        json!({ "scanId": scan_id }),
        Some(&admin_token),
    );
    assert_eq!(admin_hit.get("valid").and_then(|v| v.as_bool()), Some(true));
}
