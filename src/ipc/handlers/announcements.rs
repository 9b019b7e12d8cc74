use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone)]
struct AnnouncementRow {
    id: String,
    title: String,
    content: String,
    posted_by: String,
    target_department: Option<String>,
    target_year: Option<String>,
    is_active: bool,
    created_at: String,
}

const SELECT_COLS: &str =
    "id, title, content, posted_by, target_department, target_year, is_active, created_at";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AnnouncementRow> {
    Ok(AnnouncementRow {
        id: r.get(0)?,
        title: r.get(1)?,
        content: r.get(2)?,
        posted_by: r.get(3)?,
        target_department: r.get(4)?,
        target_year: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
    })
}

fn row_json(row: &AnnouncementRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "title": row.title,
        "content": row.content,
        "postedBy": row.posted_by,
        "targetDepartment": row.target_department,
        "targetYear": row.target_year,
        "isActive": row.is_active,
        "createdAt": row.created_at
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<AnnouncementRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM announcements WHERE id = ?", SELECT_COLS),
        [id],
        map_row,
    )
    .optional()
    .map_err(db_query)
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;
    let params = &req.params;

    let row = AnnouncementRow {
        id: Uuid::new_v4().to_string(),
        title: required_str(params, "title")?,
        content: required_str(params, "content")?,
        posted_by: ident.user_id,
        target_department: optional_str(params, "targetDepartment"),
        target_year: optional_str(params, "targetYear"),
        is_active: true,
        created_at: Utc::now().to_rfc3339(),
    };
    state
        .db
        .execute(
            "INSERT INTO announcements(id, title, content, posted_by, target_department,
                                       target_year, is_active, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
            (
                &row.id,
                &row.title,
                &row.content,
                &row.posted_by,
                &row.target_department,
                &row.target_year,
                &row.created_at,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let params = &req.params;

    let mut clauses: Vec<&str> = vec!["is_active = 1"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(department) = optional_str(params, "department") {
        clauses.push("target_department = ?");
        args.push(Value::Text(department));
    }
    if let Some(year) = optional_str(params, "year") {
        clauses.push("target_year = ?");
        args.push(Value::Text(year));
    }

    let sql = format!(
        "SELECT {} FROM announcements WHERE {} ORDER BY created_at DESC",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "announcements": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let id = required_str(&req.params, "id")?;
    match fetch(&state.db, &id)? {
        Some(row) => Ok(row_json(&row)),
        None => Err(HandlerErr::not_found("announcement not found")),
    }
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let id = required_str(params, "id")?;

    let Some(mut row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("announcement not found"));
    };
    ident.require_owner_or_admin(&row.posted_by)?;

    if let Some(v) = optional_str(params, "title") {
        row.title = v;
    }
    if let Some(v) = optional_str(params, "content") {
        row.content = v;
    }
    if let Some(v) = optional_str(params, "targetDepartment") {
        row.target_department = Some(v);
    }
    if let Some(v) = optional_str(params, "targetYear") {
        row.target_year = Some(v);
    }
    if let Some(v) = optional_bool(params, "isActive") {
        row.is_active = v;
    }

    state
        .db
        .execute(
            "UPDATE announcements SET title = ?, content = ?, target_department = ?,
                 target_year = ?, is_active = ?
             WHERE id = ?",
            (
                &row.title,
                &row.content,
                &row.target_department,
                &row.target_year,
                row.is_active as i64,
                &id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

// Soft delete; the row stays for audit but drops out of listings.
fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let id = required_str(&req.params, "id")?;

    let Some(row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("announcement not found"));
    };
    ident.require_owner_or_admin(&row.posted_by)?;

    state
        .db
        .execute("UPDATE announcements SET is_active = 0 WHERE id = ?", [&id])
        .map_err(db_update)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "announcements.create" => create(state, req),
        "announcements.list" => list(state, req),
        "announcements.get" => get(state, req),
        "announcements.update" => update(state, req),
        "announcements.delete" => delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
