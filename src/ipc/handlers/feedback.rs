use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_tx, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_date, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

use super::students::student_exists;
use super::teachers::teacher_exists;

#[derive(Debug, Clone)]
struct SessionRow {
    id: String,
    title: String,
    start_date: String,
    end_date: String,
    status: String,
    created_by: String,
    department: String,
    year: String,
    semester: String,
    academic_year: String,
}

const SESSION_COLS: &str = "id, title, start_date, end_date, status, created_by,
                            department, year, semester, academic_year";

fn map_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: r.get(0)?,
        title: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        status: r.get(4)?,
        created_by: r.get(5)?,
        department: r.get(6)?,
        year: r.get(7)?,
        semester: r.get(8)?,
        academic_year: r.get(9)?,
    })
}

fn session_json(row: &SessionRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "title": row.title,
        "startDate": row.start_date,
        "endDate": row.end_date,
        "status": row.status,
        "createdBy": row.created_by,
        "department": row.department,
        "year": row.year,
        "semester": row.semester,
        "academicYear": row.academic_year
    })
}

fn fetch_session(conn: &Connection, id: &str) -> Result<Option<SessionRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM feedback_sessions WHERE id = ?", SESSION_COLS),
        [id],
        map_session,
    )
    .optional()
    .map_err(db_query)
}

fn parse_session_status(raw: &str) -> Result<String, HandlerErr> {
    match raw {
        "open" | "closed" => Ok(raw.to_string()),
        _ => Err(HandlerErr::bad_params("status must be open or closed")),
    }
}

fn session_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let params = &req.params;

    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;
    if end_date < start_date {
        return Err(HandlerErr::bad_params("endDate must not precede startDate"));
    }

    let row = SessionRow {
        id: Uuid::new_v4().to_string(),
        title: required_str(params, "title")?,
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
        status: "open".to_string(),
        created_by: ident.user_id,
        department: required_str(params, "department")?,
        year: required_str(params, "year")?,
        semester: required_str(params, "semester")?,
        academic_year: required_str(params, "academicYear")?,
    };
    state
        .db
        .execute(
            "INSERT INTO feedback_sessions(id, title, start_date, end_date, status, created_by,
                                           department, year, semester, academic_year)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row.id,
                &row.title,
                &row.start_date,
                &row.end_date,
                &row.status,
                &row.created_by,
                &row.department,
                &row.year,
                &row.semester,
                &row.academic_year,
            ),
        )
        .map_err(db_update)?;

    Ok(session_json(&row))
}

// Students only ever see open sessions for their own class; staff see
// everything, optionally filtered.
fn session_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;

    let mut clauses: Vec<&str> = vec!["1=1"];
    let mut args: Vec<Value> = Vec::new();
    if ident.is_staff() {
        if let Some(status) = optional_str(params, "status") {
            clauses.push("status = ?");
            args.push(Value::Text(parse_session_status(&status)?));
        }
        if let Some(department) = optional_str(params, "department") {
            clauses.push("department = ?");
            args.push(Value::Text(department));
        }
        if let Some(year) = optional_str(params, "year") {
            clauses.push("year = ?");
            args.push(Value::Text(year));
        }
    } else {
        let (department, year): (String, String) = state
            .db
            .query_row(
                "SELECT department, year FROM students WHERE user_id = ?",
                [&ident.user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(db_query)?
            .ok_or_else(|| HandlerErr::not_found("student profile not found"))?;
        clauses.push("status = 'open'");
        clauses.push("department = ?");
        args.push(Value::Text(department));
        clauses.push("year = ?");
        args.push(Value::Text(year));
    }

    let sql = format!(
        "SELECT {} FROM feedback_sessions WHERE {} ORDER BY start_date DESC",
        SESSION_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_session)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "sessions": rows.iter().map(session_json).collect::<Vec<_>>() }))
}

fn session_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let id = required_str(params, "id")?;

    let Some(mut row) = fetch_session(&state.db, &id)? else {
        return Err(HandlerErr::not_found("feedback session not found"));
    };
    ident.require_owner_or_admin(&row.created_by)?;

    if let Some(v) = optional_str(params, "title") {
        row.title = v;
    }
    if let Some(v) = optional_str(params, "startDate") {
        row.start_date = crate::ipc::params::parse_date(&v, "startDate")?.to_string();
    }
    if let Some(v) = optional_str(params, "endDate") {
        row.end_date = crate::ipc::params::parse_date(&v, "endDate")?.to_string();
    }
    if let Some(v) = optional_str(params, "status") {
        row.status = parse_session_status(&v)?;
    }

    state
        .db
        .execute(
            "UPDATE feedback_sessions SET title = ?, start_date = ?, end_date = ?, status = ?
             WHERE id = ?",
            (&row.title, &row.start_date, &row.end_date, &row.status, &id),
        )
        .map_err(db_update)?;

    Ok(session_json(&row))
}

// Hard delete; submitted entries go with the session.
fn session_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let id = required_str(&req.params, "id")?;

    let Some(row) = fetch_session(&state.db, &id)? else {
        return Err(HandlerErr::not_found("feedback session not found"));
    };
    ident.require_owner_or_admin(&row.created_by)?;

    let tx = state.db.unchecked_transaction().map_err(db_tx)?;
    tx.execute("DELETE FROM feedback WHERE session_id = ?", [&id])
        .map_err(db_update)?;
    tx.execute("DELETE FROM feedback_sessions WHERE id = ?", [&id])
        .map_err(db_update)?;
    tx.commit().map_err(db_tx)?;

    Ok(json!({ "deleted": true }))
}

fn entry_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "sessionId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "teacherId": r.get::<_, String>(3)?,
        "subject": r.get::<_, String>(4)?,
        "rating": r.get::<_, i64>(5)?,
        "comments": r.get::<_, Option<String>>(6)?,
        "submittedAt": r.get::<_, String>(7)?
    }))
}

fn submit(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Student])?;
    let params = &req.params;

    let session_id = required_str(params, "sessionId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let subject = required_str(params, "subject")?;
    let rating = required_i64(params, "rating")?;
    if !(1..=5).contains(&rating) {
        return Err(HandlerErr::bad_params("rating must be between 1 and 5"));
    }
    let comments = optional_str(params, "comments");

    let Some(session) = fetch_session(&state.db, &session_id)? else {
        return Err(HandlerErr::not_found("feedback session not found"));
    };
    if session.status != "open" {
        return Err(HandlerErr::conflict("feedback session is closed"));
    }
    if !teacher_exists(&state.db, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    if !student_exists(&state.db, &ident.user_id)? {
        return Err(HandlerErr::not_found("student profile not found"));
    }

    let duplicate: Option<String> = state
        .db
        .query_row(
            "SELECT id FROM feedback
             WHERE session_id = ? AND student_id = ? AND teacher_id = ? AND subject = ?",
            (&session_id, &ident.user_id, &teacher_id, &subject),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query)?;
    if duplicate.is_some() {
        return Err(HandlerErr::conflict(
            "feedback already submitted for this teacher and subject",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let submitted_at = Utc::now().to_rfc3339();
    state
        .db
        .execute(
            "INSERT INTO feedback(id, session_id, student_id, teacher_id, subject, rating,
                                  comments, submitted_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &session_id,
                &ident.user_id,
                &teacher_id,
                &subject,
                rating,
                &comments,
                &submitted_at,
            ),
        )
        .map_err(db_update)?;

    Ok(json!({
        "id": id,
        "sessionId": session_id,
        "studentId": ident.user_id,
        "teacherId": teacher_id,
        "subject": subject,
        "rating": rating,
        "comments": comments,
        "submittedAt": submitted_at
    }))
}

fn by_session(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let session_id = required_str(&req.params, "sessionId")?;

    if fetch_session(&state.db, &session_id)?.is_none() {
        return Err(HandlerErr::not_found("feedback session not found"));
    }

    let mut stmt = state
        .db
        .prepare(
            "SELECT id, session_id, student_id, teacher_id, subject, rating, comments,
                    submitted_at
             FROM feedback WHERE session_id = ? ORDER BY submitted_at",
        )
        .map_err(db_query)?;
    let rows = stmt
        .query_map([&session_id], entry_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "feedback": rows }))
}

fn analytics(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let session_id = required_str(&req.params, "sessionId")?;

    if fetch_session(&state.db, &session_id)?.is_none() {
        return Err(HandlerErr::not_found("feedback session not found"));
    }

    let mut stmt = state
        .db
        .prepare(
            "SELECT teacher_id, subject, AVG(rating), COUNT(*)
             FROM feedback WHERE session_id = ?
             GROUP BY teacher_id, subject
             ORDER BY teacher_id, subject",
        )
        .map_err(db_query)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "teacherId": r.get::<_, String>(0)?,
                "subject": r.get::<_, String>(1)?,
                "averageRating": ledger::round_off_2_decimals(r.get::<_, f64>(2)?),
                "responseCount": r.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "sessionId": session_id, "analytics": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "feedback.sessions.create" => session_create(state, req),
        "feedback.sessions.list" => session_list(state, req),
        "feedback.sessions.update" => session_update(state, req),
        "feedback.sessions.delete" => session_delete(state, req),
        "feedback.submit" => submit(state, req),
        "feedback.bySession" => by_session(state, req),
        "feedback.analytics" => analytics(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
