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

fn result_entry(
    student_id: &str,
    subject_code: &str,
    cia: f64,
    sem: f64,
    grade: &str,
) -> serde_json::Value {
    json!({
        "studentId": student_id,
        "semester": "3",
        "academicYear": "2025-26",
        "subjectCode": subject_code,
        "subjectName": format!("Subject {}", subject_code),
        "ciaMarks": cia,
        "semesterMarks": sem,
        "grade": grade,
        "resultStatus": "pass"
    })
}

#[test]
fn total_marks_are_recomputed_not_trusted() {
    let db = temp_db("portal-result-total");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (_admin, admin_tok) = register(&mut stdin, &mut reader, "admin", "res.admin", json!({}));
    let (student_id, _tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "res.student",
        json!({ "department": "CSE", "year": "2" }),
    );

    let mut entry = result_entry(&student_id, "CS301", 38.0, 52.0, "A");
    entry["totalMarks"] = json!(999.0);
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "results.upsert",
        Some(&admin_tok),
        entry,
    );
    assert_eq!(row["totalMarks"].as_f64(), Some(90.0));
    assert_eq!(row["resultStatus"].as_str(), Some("PASS"));

    // Upsert is idempotent on the natural key.
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "results.upsert",
        Some(&admin_tok),
        result_entry(&student_id, "CS301", 40.0, 50.0, "A"),
    );
    assert_eq!(row["totalMarks"].as_f64(), Some(90.0));
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "results.byStudent",
        Some(&admin_tok),
        json!({ "studentId": student_id }),
    );
    assert_eq!(listing["results"].as_array().map(Vec::len), Some(1));

    let mut bad = result_entry(&student_id, "CS302", 30.0, 40.0, "B");
    bad["resultStatus"] = json!("maybe");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "r4",
        "results.upsert",
        Some(&admin_tok),
        bad,
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bulk_upsert_is_all_or_nothing() {
    let db = temp_db("portal-result-bulk");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (_admin, admin_tok) = register(&mut stdin, &mut reader, "admin", "bulk.admin", json!({}));
    let (student_id, _tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "bulk.student",
        json!({ "department": "CSE", "year": "2" }),
    );

    // One entry with negative marks sinks the whole batch.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "b1",
        "results.bulkUpsert",
        Some(&admin_tok),
        json!({ "results": [
            result_entry(&student_id, "CS301", 40.0, 50.0, "A"),
            result_entry(&student_id, "CS302", -5.0, 50.0, "B"),
        ]}),
    );
    assert_eq!(code, "bad_params");
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "b2",
        "results.byStudent",
        Some(&admin_tok),
        json!({ "studentId": student_id }),
    );
    assert_eq!(listing["results"].as_array().map(Vec::len), Some(0));

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "b3",
        "results.bulkUpsert",
        Some(&admin_tok),
        json!({ "results": [
            result_entry(&student_id, "CS301", 40.0, 50.0, "A"),
            result_entry(&student_id, "CS302", 35.0, 45.0, "B+"),
            result_entry(&student_id, "CS303", 45.0, 52.0, "A+"),
        ]}),
    );
    assert_eq!(out["count"].as_i64(), Some(3));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn gpa_follows_the_grade_table() {
    let db = temp_db("portal-result-gpa");
    let (mut child, mut stdin, mut reader) = spawn_portald(&db);

    let (_admin, admin_tok) = register(&mut stdin, &mut reader, "admin", "gpa.admin", json!({}));
    let (student_id, student_tok) = register(
        &mut stdin,
        &mut reader,
        "student",
        "gpa.student",
        json!({ "department": "CSE", "year": "2" }),
    );

    // No rows yet.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "g1",
        "results.gpa",
        Some(&student_tok),
        json!({ "studentId": student_id, "semester": "3", "academicYear": "2025-26" }),
    );
    assert_eq!(code, "not_found");

    request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "results.bulkUpsert",
        Some(&admin_tok),
        json!({ "results": [
            result_entry(&student_id, "CS301", 40.0, 50.0, "A"),
            result_entry(&student_id, "CS302", 35.0, 45.0, "B+"),
            result_entry(&student_id, "CS303", 45.0, 52.0, "A+"),
        ]}),
    );

    // (9 + 8 + 10) / 3
    let out = request_ok(
        &mut stdin,
        &mut reader,
        "g3",
        "results.gpa",
        Some(&student_tok),
        json!({ "studentId": student_id, "semester": "3", "academicYear": "2025-26" }),
    );
    assert_eq!(out["gpa"].as_f64(), Some(9.0));
    assert_eq!(out["totalSubjects"].as_i64(), Some(3));

    // Deleting a subject changes the mean.
    request_ok(
        &mut stdin,
        &mut reader,
        "g4",
        "results.delete",
        Some(&admin_tok),
        json!({
            "studentId": student_id,
            "semester": "3",
            "academicYear": "2025-26",
            "subjectCode": "CS302"
        }),
    );
    let out = request_ok(
        &mut stdin,
        &mut reader,
        "g5",
        "results.gpa",
        Some(&student_tok),
        json!({ "studentId": student_id, "semester": "3", "academicYear": "2025-26" }),
    );
    assert_eq!(out["gpa"].as_f64(), Some(9.5));

    // Deleting the same row twice.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "g6",
        "results.delete",
        Some(&admin_tok),
        json!({
            "studentId": student_id,
            "semester": "3",
            "academicYear": "2025-26",
            "subjectCode": "CS302"
        }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
}
