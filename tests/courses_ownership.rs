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

struct Faculty {
    admin_token: String,
    owner_id: String,
    owner_token: String,
    other_token: String,
    student_id: String,
}

fn seed_faculty(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Faculty {
    let _ = request_ok(
        stdin,
        reader,
        "f1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let _ = request_ok(
        stdin,
        reader,
        "f2",
        "setup.bootstrap",
        json!({
            "fullName": "Alice Admin",
            "email": "admin@school.test",
            "password": "admin-pw-1"
        }),
        None,
    );
    let admin_token = login(stdin, reader, "f3", "admin@school.test", "admin-pw-1");

    let owner = request_ok(
        stdin,
        reader,
        "f4",
        "users.create",
        json!({
            "fullName": "Paula Owner",
            "email": "paula@school.test",
            "role": "PROF",
            "password": "owner-pw-1!"
        }),
        Some(&admin_token),
    );
    let owner_id = owner
        .pointer("/user/id")
        .and_then(|v| v.as_str())
        .expect("owner id")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "f5",
        "users.create",
        json!({
            "fullName": "Quentin Other",
            "email": "quentin@school.test",
            "role": "PROF",
            "password": "other-pw-1!"
        }),
        Some(&admin_token),
    );
    let owner_token = login(stdin, reader, "f6", "paula@school.test", "owner-pw-1!");
    let other_token = login(stdin, reader, "f7", "quentin@school.test", "other-pw-1!");

    let student = request_ok(
        stdin,
        reader,
        "f8",
        "students.create",
        json!({ "fullName": "Sami Student", "email": "sami@school.test" }),
        Some(&admin_token),
    );
    let student_id = student
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    Faculty {
        admin_token,
        owner_id,
        owner_token,
        other_token,
        student_id,
    }
}

#[test]
fn updates_and_deletes_respect_ownership() {
    let workspace = temp_dir("epointyd-courses-own");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let faculty = seed_faculty(&mut stdin, &mut reader, &workspace);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.create",
        json!({ "title": "Algebra", "code": "MATH101", "schedule": "Mon 08:00" }),
        Some(&faculty.owner_token),
    );
    assert_eq!(
        course.pointer("/course/professorId").and_then(|v| v.as_str()),
        Some(faculty.owner_id.as_str())
    );
    let course_id = course
        .pointer("/course/id")
        .and_then(|v| v.as_str())
        .expect("course id")
        .to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "courses.update",
        json!({ "courseId": course_id, "title": "Hijacked" }),
        Some(&faculty.other_token),
    );
    assert_eq!(code, "forbidden");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.update",
        json!({ "courseId": course_id, "title": "Linear Algebra" }),
        Some(&faculty.owner_token),
    );
    assert_eq!(
        updated.pointer("/course/title").and_then(|v| v.as_str()),
        Some("Linear Algebra")
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.update",
        json!({ "courseId": course_id, "schedule": "Mon 09:00" }),
        Some(&faculty.admin_token),
    );
    assert_eq!(
        updated.pointer("/course/schedule").and_then(|v| v.as_str()),
        Some("Mon 09:00")
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "courses.delete",
        json!({ "courseId": course_id }),
        Some(&faculty.other_token),
    );
    assert_eq!(code, "forbidden");

    // Deleting the course takes its attendance rows with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({ "studentId": faculty.student_id, "courseId": course_id }),
        Some(&faculty.owner_token),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.delete",
        json!({ "courseId": course_id }),
        Some(&faculty.owner_token),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "courses.update",
        json!({ "courseId": course_id, "title": "Ghost" }),
        Some(&faculty.owner_token),
    );
    assert_eq!(code, "not_found");

    let db = rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let rows: i64 = db
        .query_row(
            "SELECT COUNT(*) FROM attendances WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(rows, 0);
}

#[test]
fn creation_assigns_a_real_professor_owner() {
    let workspace = temp_dir("epointyd-courses-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let faculty = seed_faculty(&mut stdin, &mut reader, &workspace);

    // An admin has no implicit ownership, so the owner must be named...
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "courses.create",
        json!({ "title": "Orphan", "code": "ORX1", "schedule": "Fri 10:00" }),
        Some(&faculty.admin_token),
    );
    assert_eq!(code, "bad_params");

    // ...and must actually be a professor.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({
            "title": "Misassigned",
            "code": "ORX2",
            "schedule": "Fri 10:00",
            "professorId": faculty.student_id
        }),
        Some(&faculty.admin_token),
    );
    assert_eq!(code, "bad_params");

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({
            "title": "Geometry",
            "code": "MATH102",
            "schedule": "Thu 08:00",
            "professorId": faculty.owner_id
        }),
        Some(&faculty.admin_token),
    );
    assert_eq!(
        assigned
            .pointer("/course/professorId")
            .and_then(|v| v.as_str()),
        Some(faculty.owner_id.as_str())
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "title": "Analysis", "code": "MATH201", "schedule": "Tue 08:00" }),
        Some(&faculty.owner_token),
    );

    // Professors see only their own catalog; the admin sees everything.
    let own = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.list",
        json!({}),
        Some(&faculty.owner_token),
    );
    assert_eq!(
        own.get("courses").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.list",
        json!({}),
        Some(&faculty.other_token),
    );
    assert_eq!(
        other
            .get("courses")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.list",
        json!({}),
        Some(&faculty.admin_token),
    );
    assert_eq!(
        all.get("courses").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
}
