use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_date, optional_str, required_date, required_str};
use crate::ipc::types::{AppState, Request};

const EVENT_TYPES: [&str; 4] = ["holiday", "exam", "assignment", "event"];

fn parse_event_type(raw: &str) -> Result<String, HandlerErr> {
    if EVENT_TYPES.contains(&raw) {
        return Ok(raw.to_string());
    }
    Err(HandlerErr::bad_params(
        "eventType must be holiday, exam, assignment or event",
    ))
}

#[derive(Debug, Clone)]
struct EventRow {
    id: String,
    date: String,
    title: String,
    event_type: String,
    description: Option<String>,
    created_by: String,
    department: Option<String>,
    year: Option<String>,
}

const SELECT_COLS: &str = "id, date, title, event_type, description, created_by, department, year";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: r.get(0)?,
        date: r.get(1)?,
        title: r.get(2)?,
        event_type: r.get(3)?,
        description: r.get(4)?,
        created_by: r.get(5)?,
        department: r.get(6)?,
        year: r.get(7)?,
    })
}

fn row_json(row: &EventRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "date": row.date,
        "title": row.title,
        "eventType": row.event_type,
        "description": row.description,
        "createdBy": row.created_by,
        "department": row.department,
        "year": row.year
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<EventRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM calendar_events WHERE id = ?", SELECT_COLS),
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

    let row = EventRow {
        id: Uuid::new_v4().to_string(),
        date: required_date(params, "date")?.to_string(),
        title: required_str(params, "title")?,
        event_type: parse_event_type(&required_str(params, "eventType")?)?,
        description: optional_str(params, "description"),
        created_by: ident.user_id,
        department: optional_str(params, "department"),
        year: optional_str(params, "year"),
    };
    state
        .db
        .execute(
            "INSERT INTO calendar_events(id, date, title, event_type, description, created_by,
                                         department, year)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row.id,
                &row.date,
                &row.title,
                &row.event_type,
                &row.description,
                &row.created_by,
                &row.department,
                &row.year,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let params = &req.params;

    let mut clauses: Vec<&str> = vec!["1=1"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(start) = optional_date(params, "startDate")? {
        clauses.push("date >= ?");
        args.push(Value::Text(start.to_string()));
    }
    if let Some(end) = optional_date(params, "endDate")? {
        clauses.push("date <= ?");
        args.push(Value::Text(end.to_string()));
    }
    if let Some(event_type) = optional_str(params, "eventType") {
        clauses.push("event_type = ?");
        args.push(Value::Text(parse_event_type(&event_type)?));
    }
    // Class-scoped events plus campus-wide ones with no target set.
    if let Some(department) = optional_str(params, "department") {
        clauses.push("(department = ? OR department IS NULL)");
        args.push(Value::Text(department));
    }
    if let Some(year) = optional_str(params, "year") {
        clauses.push("(year = ? OR year IS NULL)");
        args.push(Value::Text(year));
    }

    let sql = format!(
        "SELECT {} FROM calendar_events WHERE {} ORDER BY date",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "events": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let id = required_str(params, "id")?;

    let Some(mut row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("calendar event not found"));
    };
    ident.require_owner_or_admin(&row.created_by)?;

    if let Some(v) = optional_date(params, "date")? {
        row.date = v.to_string();
    }
    if let Some(v) = optional_str(params, "title") {
        row.title = v;
    }
    if let Some(v) = optional_str(params, "eventType") {
        row.event_type = parse_event_type(&v)?;
    }
    if let Some(v) = optional_str(params, "description") {
        row.description = Some(v);
    }
    if let Some(v) = optional_str(params, "department") {
        row.department = Some(v);
    }
    if let Some(v) = optional_str(params, "year") {
        row.year = Some(v);
    }

    state
        .db
        .execute(
            "UPDATE calendar_events SET date = ?, title = ?, event_type = ?, description = ?,
                 department = ?, year = ?
             WHERE id = ?",
            (
                &row.date,
                &row.title,
                &row.event_type,
                &row.description,
                &row.department,
                &row.year,
                &id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let id = required_str(&req.params, "id")?;

    let Some(row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("calendar event not found"));
    };
    ident.require_owner_or_admin(&row.created_by)?;

    state
        .db
        .execute("DELETE FROM calendar_events WHERE id = ?", [&id])
        .map_err(db_update)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "calendar.create" => create(state, req),
        "calendar.list" => list(state, req),
        "calendar.update" => update(state, req),
        "calendar.delete" => delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
