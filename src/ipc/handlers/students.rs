use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone)]
struct StudentRow {
    user_id: String,
    name: String,
    roll_number: Option<String>,
    department: Option<String>,
    year: Option<String>,
    current_semester: Option<String>,
    academic_year: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    gender: Option<String>,
    address: Option<String>,
}

const SELECT_COLS: &str = "user_id, name, roll_number, department, year, current_semester,
                           academic_year, email, phone, gender, address";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        user_id: r.get(0)?,
        name: r.get(1)?,
        roll_number: r.get(2)?,
        department: r.get(3)?,
        year: r.get(4)?,
        current_semester: r.get(5)?,
        academic_year: r.get(6)?,
        email: r.get(7)?,
        phone: r.get(8)?,
        gender: r.get(9)?,
        address: r.get(10)?,
    })
}

fn row_json(row: &StudentRow) -> serde_json::Value {
    json!({
        "userId": row.user_id,
        "name": row.name,
        "rollNumber": row.roll_number,
        "department": row.department,
        "year": row.year,
        "currentSemester": row.current_semester,
        "academicYear": row.academic_year,
        "email": row.email,
        "phone": row.phone,
        "gender": row.gender,
        "address": row.address
    })
}

fn fetch(conn: &Connection, user_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE user_id = ?", SELECT_COLS),
        [user_id],
        map_row,
    )
    .optional()
    .map_err(db_query)
}

pub(crate) fn student_profile_json(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    Ok(fetch(conn, user_id)?.map(|row| row_json(&row)))
}

pub(crate) fn student_exists(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE user_id = ?", [user_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query)
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Teacher])?;

    let mut clauses: Vec<&str> = vec!["1=1"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(department) = optional_str(&req.params, "department") {
        clauses.push("department = ?");
        args.push(Value::Text(department));
    }
    if let Some(year) = optional_str(&req.params, "year") {
        clauses.push("year = ?");
        args.push(Value::Text(year));
    }

    let sql = format!(
        "SELECT {} FROM students WHERE {} ORDER BY name",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "students": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let user_id = required_str(&req.params, "userId")?;
    ident.require_self_or_staff(&user_id)?;

    match fetch(&state.db, &user_id)? {
        Some(row) => Ok(row_json(&row)),
        None => Err(HandlerErr::not_found("student not found")),
    }
}

// Explicit allow-list; userId and role are never updatable.
fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;
    let user_id = required_str(params, "userId")?;

    let Some(mut row) = fetch(&state.db, &user_id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };

    if let Some(v) = optional_str(params, "name") {
        row.name = v;
    }
    if let Some(v) = optional_str(params, "rollNumber") {
        row.roll_number = Some(v);
    }
    if let Some(v) = optional_str(params, "department") {
        row.department = Some(v);
    }
    if let Some(v) = optional_str(params, "year") {
        row.year = Some(v);
    }
    if let Some(v) = optional_str(params, "currentSemester") {
        row.current_semester = Some(v);
    }
    if let Some(v) = optional_str(params, "academicYear") {
        row.academic_year = Some(v);
    }
    if let Some(v) = optional_str(params, "email") {
        row.email = Some(v);
    }
    if let Some(v) = optional_str(params, "phone") {
        row.phone = Some(v);
    }
    if let Some(v) = optional_str(params, "gender") {
        row.gender = Some(v);
    }
    if let Some(v) = optional_str(params, "address") {
        row.address = Some(v);
    }

    state
        .db
        .execute(
            "UPDATE students SET name = ?, roll_number = ?, department = ?, year = ?,
                 current_semester = ?, academic_year = ?, email = ?, phone = ?,
                 gender = ?, address = ?
             WHERE user_id = ?",
            (
                &row.name,
                &row.roll_number,
                &row.department,
                &row.year,
                &row.current_semester,
                &row.academic_year,
                &row.email,
                &row.phone,
                &row.gender,
                &row.address,
                &user_id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state, req),
        "students.get" => get(state, req),
        "students.update" => update(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
