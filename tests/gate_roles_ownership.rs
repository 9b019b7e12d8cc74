use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_db(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join("portal.db")
}

fn spawn_portald(db_path: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .env("PORTAL_DB", db_path)
        .env("PORTAL_SECRET", "portal-test-secret")
        .env("PORTAL_TOKEN_TTL_HOURS", "24")
        .env_remove("PORTAL_PORT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: serde_json::Value,
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, token, params);
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
    token: Option<&str>,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, token, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

// signup + signin, returning (user_id, token).
fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    role: &str,
    username: &str,
    mut extra: serde_json::Value,
) -> (String, String) {
    let mut params = json!({
        "name": username.replace('.', " "),
        "username": username,
        "email": format!("{}@portal.test", username),
        "password": "s3cret-pass",
        "role": role
    });
    if let (Some(dst), Some(src)) = (params.as_object_mut(), extra.as_object_mut()) {
        for (k, v) in src.iter() {
            dst.insert(k.clone(), v.clone());
        }
    }
    let created = request_ok(stdin, reader, "reg-up", "auth.signup", None, params);
    let user_id = created["userId"].as_str().expect("userId").to_string();
    let signed_in = request_ok(
        stdin,
        reader,
        "reg-in",
        "auth.signin",
        None,
        json!({ "username": username, "password": "s3cret-pass" }),
    );
    let token = signed_in["accessToken"].as_str().expect("token").to_string();
    (user_id, token)
}

#[test]
fn students_cannot_reach_staff_operations() {
    let db = temp_db("portal-gate-staff");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (student_id, student_tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "gate.student",
        json!({ "department": "CSE", "year": "2" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "g1",
        "students.list",
        Some(&student_tok),
        json!({}),
    );
    assert_eq!(code, "forbidden");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "g2",
        "fees.upsert",
        Some(&student_tok),
        json!({
            "studentId": student_id,
            "semester": "3",
            "academicYear": "2025-26",
            "totalFee": 50000.0,
            "paid": 0.0,
            "dueDate": "2026-12-01"
        }),
    );
    assert_eq!(code, "forbidden");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn student_scoped_reads_refuse_other_students() {
    let db = temp_db("portal-gate-scope");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (alice_id, alice_tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "scope.alice",
        json!({ "department": "CSE", "year": "2" }),
    );
    let (bob_id, bob_tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "scope.bob",
        json!({ "department": "CSE", "year": "2" }),
    );
    let (_teacher_id, teacher_tok) =
        register(&mut stdin, &mut reader, "teacher", "scope.teacher", json!({}));

    // Another student's listing is refused; own id is fine.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s1",
        "attendance.list",
        Some(&alice_tok),
        json!({ "studentId": bob_id }),
    );
    assert_eq!(code, "forbidden");
    request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "attendance.list",
        Some(&alice_tok),
        json!({ "studentId": alice_id }),
    );

    // Profile reads follow the same rule; staff may read anyone.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s3",
        "students.get",
        Some(&bob_tok),
        json!({ "userId": alice_id }),
    );
    assert_eq!(code, "forbidden");
    request_ok(
        &mut stdin,
        &mut reader,
        "s4",
        "students.get",
        Some(&teacher_tok),
        json!({ "userId": alice_id }),
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn announcement_ownership_gates_mutation() {
    let db = temp_db("portal-gate-owner");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (_a, author_tok) =
        register(&mut stdin, &mut reader, "teacher", "owner.author", json!({}));
    let (_b, other_tok) =
        register(&mut stdin, &mut reader, "teacher", "owner.other", json!({}));
    let (_c, admin_tok) = register(&mut stdin, &mut reader, "admin", "owner.admin", json!({}));

    let ann = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "announcements.create",
        Some(&author_tok),
        json!({ "title": "Lab closed", "content": "Network lab closed on Friday" }),
    );
    let ann_id = ann["id"].as_str().expect("announcement id").to_string();

    // A different teacher may not touch it, and the record is unchanged.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "a2",
        "announcements.delete",
        Some(&other_tok),
        json!({ "id": ann_id }),
    );
    assert_eq!(code, "forbidden");
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "announcements.get",
        Some(&other_tok),
        json!({ "id": ann_id }),
    );
    assert_eq!(fetched["isActive"].as_bool(), Some(true));
    assert_eq!(fetched["title"].as_str(), Some("Lab closed"));

    // Admin passes every ownership check.
    request_ok(
        &mut stdin,
        &mut reader,
        "a4",
        "announcements.delete",
        Some(&admin_tok),
        json!({ "id": ann_id }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "a5",
        "announcements.get",
        Some(&admin_tok),
        json!({ "id": ann_id }),
    );
    assert_eq!(fetched["isActive"].as_bool(), Some(false));

    drop(stdin);
    let _ = child.wait();
}
