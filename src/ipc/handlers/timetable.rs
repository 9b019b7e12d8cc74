use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

use super::teachers::teacher_exists;

const DAYS: [&str; 6] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

fn parse_day(raw: &str) -> Result<String, HandlerErr> {
    DAYS.iter()
        .find(|d| d.eq_ignore_ascii_case(raw))
        .map(|d| d.to_string())
        .ok_or_else(|| HandlerErr::bad_params("day must be Monday through Saturday"))
}

// SQL ordering helper so listings come out Monday-first.
const DAY_ORDER: &str = "CASE day
    WHEN 'Monday' THEN 1 WHEN 'Tuesday' THEN 2 WHEN 'Wednesday' THEN 3
    WHEN 'Thursday' THEN 4 WHEN 'Friday' THEN 5 WHEN 'Saturday' THEN 6 END";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "department": r.get::<_, String>(0)?,
        "year": r.get::<_, String>(1)?,
        "day": r.get::<_, String>(2)?,
        "period": r.get::<_, i64>(3)?,
        "subject": r.get::<_, String>(4)?,
        "teacherId": r.get::<_, String>(5)?,
        "room": r.get::<_, Option<String>>(6)?,
        "startTime": r.get::<_, String>(7)?,
        "endTime": r.get::<_, String>(8)?
    }))
}

const SELECT_COLS: &str =
    "department, year, day, period, subject, teacher_id, room, start_time, end_time";

fn set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let department = required_str(params, "department")?;
    let year = required_str(params, "year")?;
    let day = parse_day(&required_str(params, "day")?)?;
    let period = required_i64(params, "period")?;
    if period < 1 {
        return Err(HandlerErr::bad_params("period must be at least 1"));
    }
    let subject = required_str(params, "subject")?;
    let teacher_id = required_str(params, "teacherId")?;
    let room = optional_str(params, "room");
    let start_time = required_str(params, "startTime")?;
    let end_time = required_str(params, "endTime")?;

    if !teacher_exists(&state.db, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    state
        .db
        .execute(
            "INSERT INTO timetable(department, year, day, period, subject, teacher_id,
                                   room, start_time, end_time)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(department, year, day, period) DO UPDATE SET
               subject = excluded.subject,
               teacher_id = excluded.teacher_id,
               room = excluded.room,
               start_time = excluded.start_time,
               end_time = excluded.end_time",
            (
                &department, &year, &day, period, &subject, &teacher_id, &room, &start_time,
                &end_time,
            ),
        )
        .map_err(db_update)?;

    Ok(json!({
        "department": department,
        "year": year,
        "day": day,
        "period": period,
        "subject": subject,
        "teacherId": teacher_id,
        "room": room,
        "startTime": start_time,
        "endTime": end_time
    }))
}

fn by_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let department = required_str(params, "department")?;
    let year = required_str(params, "year")?;

    let sql = format!(
        "SELECT {} FROM timetable WHERE department = ? AND year = ? ORDER BY {}, period",
        SELECT_COLS, DAY_ORDER
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map((&department, &year), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "timetable": rows }))
}

fn by_teacher(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let _ident = gate::authenticate(state, req)?;
    let teacher_id = required_str(&req.params, "teacherId")?;

    let sql = format!(
        "SELECT {} FROM timetable WHERE teacher_id = ? ORDER BY {}, period",
        SELECT_COLS, DAY_ORDER
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map([&teacher_id], map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "timetable": rows }))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let affected = state
        .db
        .execute(
            "DELETE FROM timetable WHERE department = ? AND year = ? AND day = ? AND period = ?",
            (
                &required_str(params, "department")?,
                &required_str(params, "year")?,
                &parse_day(&required_str(params, "day")?)?,
                required_i64(params, "period")?,
            ),
        )
        .map_err(db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("timetable slot not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "timetable.set" => set(state, req),
        "timetable.byClass" => by_class(state, req),
        "timetable.byTeacher" => by_teacher(state, req),
        "timetable.delete" => delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
