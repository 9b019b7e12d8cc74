use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone)]
struct TeacherRow {
    user_id: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    department: Option<String>,
    designation: Option<String>,
}

const SELECT_COLS: &str = "user_id, name, email, phone, department, designation";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TeacherRow> {
    Ok(TeacherRow {
        user_id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        phone: r.get(3)?,
        department: r.get(4)?,
        designation: r.get(5)?,
    })
}

fn row_json(row: &TeacherRow) -> serde_json::Value {
    json!({
        "userId": row.user_id,
        "name": row.name,
        "email": row.email,
        "phone": row.phone,
        "department": row.department,
        "designation": row.designation
    })
}

fn fetch(conn: &Connection, user_id: &str) -> Result<Option<TeacherRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM teachers WHERE user_id = ?", SELECT_COLS),
        [user_id],
        map_row,
    )
    .optional()
    .map_err(db_query)
}

pub(crate) fn teacher_profile_json(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    Ok(fetch(conn, user_id)?.map(|row| row_json(&row)))
}

pub(crate) fn teacher_exists(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE user_id = ?", [user_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query)
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;

    let mut clauses: Vec<&str> = vec!["1=1"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(department) = optional_str(&req.params, "department") {
        clauses.push("department = ?");
        args.push(Value::Text(department));
    }

    let sql = format!(
        "SELECT {} FROM teachers WHERE {} ORDER BY name",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "teachers": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let user_id = required_str(&req.params, "userId")?;

    match fetch(&state.db, &user_id)? {
        Some(row) => Ok(row_json(&row)),
        None => Err(HandlerErr::not_found("teacher not found")),
    }
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;
    let user_id = required_str(params, "userId")?;

    let Some(mut row) = fetch(&state.db, &user_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    if let Some(v) = optional_str(params, "name") {
        row.name = v;
    }
    if let Some(v) = optional_str(params, "email") {
        row.email = Some(v);
    }
    if let Some(v) = optional_str(params, "phone") {
        row.phone = Some(v);
    }
    if let Some(v) = optional_str(params, "department") {
        row.department = Some(v);
    }
    if let Some(v) = optional_str(params, "designation") {
        row.designation = Some(v);
    }

    state
        .db
        .execute(
            "UPDATE teachers SET name = ?, email = ?, phone = ?, department = ?, designation = ?
             WHERE user_id = ?",
            (
                &row.name,
                &row.email,
                &row.phone,
                &row.department,
                &row.designation,
                &user_id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => list(state, req),
        "teachers.get" => get(state, req),
        "teachers.update" => update(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
