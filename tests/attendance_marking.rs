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
fn re_marking_a_slot_replaces_it() {
    let db = temp_db("portal-attendance");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (teacher_id, teacher_tok) =
        register(&mut stdin, &mut reader, "teacher", "att.teacher", json!({}));
    let (student_id, student_tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "att.student",
        json!({ "department": "CSE", "year": "2" }),
    );

    let mark = |status: &str| {
        json!({
            "studentId": student_id,
            "subject": "CS301",
            "date": "2026-08-24",
            "hour": 1,
            "status": status
        })
    };

    let row = request_ok(&mut stdin, &mut reader, "a1", "attendance.mark", Some(&teacher_tok), mark("absent"));
    assert_eq!(row["status"].as_str(), Some("absent"));
    assert_eq!(row["markedBy"].as_str(), Some(teacher_id.as_str()));

    // Correction overwrites the same (student, subject, date, hour) slot.
    request_ok(&mut stdin, &mut reader, "a2", "attendance.mark", Some(&teacher_tok), mark("present"));

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "attendance.list",
        Some(&student_tok),
        json!({ "subject": "CS301" }),
    );
    let rows = listing["attendance"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"].as_str(), Some("present"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "a4",
        "attendance.mark",
        Some(&teacher_tok),
        json!({
            "studentId": student_id,
            "subject": "CS301",
            "date": "2026-08-24",
            "hour": 1,
            "status": "late"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "a5",
        "attendance.mark",
        Some(&teacher_tok),
        json!({
            "studentId": "no-such-student",
            "subject": "CS301",
            "date": "2026-08-24",
            "hour": 1,
            "status": "present"
        }),
    );
    assert_eq!(code, "not_found");

    // Students cannot mark.
    let code = request_err(&mut stdin, &mut reader, "a6", "attendance.mark", Some(&student_tok), mark("present"));
    assert_eq!(code, "forbidden");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn health_unknown_method_and_bad_json() {
    let db = temp_db("portal-wire");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let health = request_ok(&mut stdin, &mut reader, "w1", "health", None, json!({}));
    assert!(health["version"].is_string());

    let code = request_err(&mut stdin, &mut reader, "w2", "no.such.method", None, json!({}));
    assert_eq!(code, "not_implemented");

    // A line that is not JSON still gets a one-line error response.
    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"].as_str(), Some("bad_json"));

    // The daemon keeps serving after a bad line.
    request_ok(&mut stdin, &mut reader, "w3", "health", None, json!({}));

    drop(stdin);
    let _ = child.wait();
}
