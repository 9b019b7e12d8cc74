use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_date, required_str};
use crate::ipc::types::{AppState, Request};

use super::students::student_exists;

#[derive(Debug, Clone)]
struct LeaveRow {
    id: String,
    student_id: String,
    start_date: String,
    end_date: String,
    reason: String,
    status: String,
    rejection_reason: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    created_at: String,
}

const SELECT_COLS: &str = "id, student_id, start_date, end_date, reason, status,
                           rejection_reason, reviewed_by, reviewed_at, created_at";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LeaveRow> {
    Ok(LeaveRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        reason: r.get(4)?,
        status: r.get(5)?,
        rejection_reason: r.get(6)?,
        reviewed_by: r.get(7)?,
        reviewed_at: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn row_json(row: &LeaveRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "studentId": row.student_id,
        "startDate": row.start_date,
        "endDate": row.end_date,
        "reason": row.reason,
        "status": row.status,
        "rejectionReason": row.rejection_reason,
        "reviewedBy": row.reviewed_by,
        "reviewedAt": row.reviewed_at,
        "createdAt": row.created_at
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<LeaveRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM leaves WHERE id = ?", SELECT_COLS),
        [id],
        map_row,
    )
    .optional()
    .map_err(db_query)
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Student])?;
    let params = &req.params;

    let student_id = optional_str(params, "studentId").unwrap_or_else(|| ident.user_id.clone());
    ident.require_owner_or_admin(&student_id)?;

    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;
    if end_date < start_date {
        return Err(HandlerErr::bad_params("endDate must not precede startDate"));
    }
    let reason = required_str(params, "reason")?;

    if !student_exists(&state.db, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let row = LeaveRow {
        id: Uuid::new_v4().to_string(),
        student_id,
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
        reason,
        status: "pending".to_string(),
        rejection_reason: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: Utc::now().to_rfc3339(),
    };
    state
        .db
        .execute(
            "INSERT INTO leaves(id, student_id, start_date, end_date, reason, status,
                                rejection_reason, reviewed_by, reviewed_at, created_at)
             VALUES(?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?)",
            (
                &row.id,
                &row.student_id,
                &row.start_date,
                &row.end_date,
                &row.reason,
                &row.status,
                &row.created_at,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
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
    if let Some(status) = optional_str(params, "status") {
        clauses.push("status = ?");
        args.push(Value::Text(status));
    }

    let sql = format!(
        "SELECT {} FROM leaves WHERE {} ORDER BY created_at DESC",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "leaves": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

// A leave request is reviewed exactly once; reviewing anything but a
// pending request is a conflict, so a second reviewer can never silently
// overwrite the first verdict.
fn review(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let params = &req.params;

    let id = required_str(params, "id")?;
    let status = match required_str(params, "status")?.as_str() {
        "approved" => "approved",
        "rejected" => "rejected",
        _ => return Err(HandlerErr::bad_params("status must be approved or rejected")),
    };
    let rejection_reason = optional_str(params, "rejectionReason");

    let Some(mut row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("leave request not found"));
    };
    if row.status != "pending" {
        return Err(HandlerErr::conflict(format!(
            "leave request already {}",
            row.status
        )));
    }

    row.status = status.to_string();
    row.reviewed_by = Some(ident.user_id.clone());
    row.reviewed_at = Some(Utc::now().to_rfc3339());
    row.rejection_reason = if status == "rejected" {
        rejection_reason
    } else {
        None
    };

    state
        .db
        .execute(
            "UPDATE leaves SET status = ?, rejection_reason = ?, reviewed_by = ?, reviewed_at = ?
             WHERE id = ?",
            (
                &row.status,
                &row.rejection_reason,
                &row.reviewed_by,
                &row.reviewed_at,
                &id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "leaves.create" => create(state, req),
        "leaves.list" => list(state, req),
        "leaves.review" => review(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
