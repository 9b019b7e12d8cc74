use chrono::Utc;
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_date, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

use super::students::student_exists;

fn parse_status(raw: &str) -> Result<&'static str, HandlerErr> {
    match raw {
        "present" => Ok("present"),
        "absent" => Ok("absent"),
        _ => Err(HandlerErr::bad_params("status must be present or absent")),
    }
}

fn mark(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let params = &req.params;

    let student_id = required_str(params, "studentId")?;
    let subject = required_str(params, "subject")?;
    let date = required_date(params, "date")?.to_string();
    let hour = required_i64(params, "hour")?;
    let status = parse_status(&required_str(params, "status")?)?;
    if hour < 1 {
        return Err(HandlerErr::bad_params("hour must be at least 1"));
    }

    if !student_exists(&state.db, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let updated_at = Utc::now().to_rfc3339();
    state
        .db
        .execute(
            "INSERT INTO attendance(student_id, subject, date, hour, status, marked_by, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject, date, hour) DO UPDATE SET
               status = excluded.status,
               marked_by = excluded.marked_by,
               updated_at = excluded.updated_at",
            (&student_id, &subject, &date, hour, status, &ident.user_id, &updated_at),
        )
        .map_err(db_update)?;

    Ok(json!({
        "studentId": student_id,
        "subject": subject,
        "date": date,
        "hour": hour,
        "status": status,
        "markedBy": ident.user_id,
        "updatedAt": updated_at
    }))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;

    let mut clauses: Vec<&str> = vec!["1=1"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(student_id) = gate::scoped_student_filter(&ident, params)? {
        clauses.push("student_id = ?");
        args.push(Value::Text(student_id));
    }
    if let Some(date) = optional_str(params, "date") {
        clauses.push("date = ?");
        args.push(Value::Text(date));
    }
    if let Some(subject) = optional_str(params, "subject") {
        clauses.push("subject = ?");
        args.push(Value::Text(subject));
    }

    let sql = format!(
        "SELECT student_id, subject, date, hour, status, marked_by, updated_at
         FROM attendance WHERE {} ORDER BY date DESC, hour",
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "subject": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "hour": r.get::<_, i64>(3)?,
                "status": r.get::<_, String>(4)?,
                "markedBy": r.get::<_, String>(5)?,
                "updatedAt": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "attendance": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.mark" => mark(state, req),
        "attendance.list" => list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
