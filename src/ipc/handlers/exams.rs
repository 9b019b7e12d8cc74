use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{
    optional_date, optional_f64, optional_i64, optional_str, required_date, required_str,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone)]
struct ExamRow {
    id: String,
    subject_code: String,
    subject: String,
    date: String,
    time: Option<String>,
    department: String,
    year: String,
    semester: String,
    academic_year: String,
    venue: Option<String>,
    duration_minutes: Option<i64>,
    max_marks: Option<f64>,
    exam_type: String,
}

const SELECT_COLS: &str = "id, subject_code, subject, date, time, department, year, semester,
                           academic_year, venue, duration_minutes, max_marks, exam_type";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExamRow> {
    Ok(ExamRow {
        id: r.get(0)?,
        subject_code: r.get(1)?,
        subject: r.get(2)?,
        date: r.get(3)?,
        time: r.get(4)?,
        department: r.get(5)?,
        year: r.get(6)?,
        semester: r.get(7)?,
        academic_year: r.get(8)?,
        venue: r.get(9)?,
        duration_minutes: r.get(10)?,
        max_marks: r.get(11)?,
        exam_type: r.get(12)?,
    })
}

fn row_json(row: &ExamRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "subjectCode": row.subject_code,
        "subject": row.subject,
        "date": row.date,
        "time": row.time,
        "department": row.department,
        "year": row.year,
        "semester": row.semester,
        "academicYear": row.academic_year,
        "venue": row.venue,
        "durationMinutes": row.duration_minutes,
        "maxMarks": row.max_marks,
        "examType": row.exam_type
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<ExamRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM exams WHERE id = ?", SELECT_COLS),
        [id],
        map_row,
    )
    .optional()
    .map_err(db_query)
}

fn schedule(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let row = ExamRow {
        id: Uuid::new_v4().to_string(),
        subject_code: required_str(params, "subjectCode")?,
        subject: required_str(params, "subject")?,
        date: required_date(params, "date")?.to_string(),
        time: optional_str(params, "time"),
        department: required_str(params, "department")?,
        year: required_str(params, "year")?,
        semester: required_str(params, "semester")?,
        academic_year: required_str(params, "academicYear")?,
        venue: optional_str(params, "venue"),
        duration_minutes: optional_i64(params, "durationMinutes"),
        max_marks: optional_f64(params, "maxMarks"),
        exam_type: required_str(params, "examType")?,
    };

    state
        .db
        .execute(
            "INSERT INTO exams(id, subject_code, subject, date, time, department, year,
                               semester, academic_year, venue, duration_minutes, max_marks,
                               exam_type)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row.id,
                &row.subject_code,
                &row.subject,
                &row.date,
                &row.time,
                &row.department,
                &row.year,
                &row.semester,
                &row.academic_year,
                &row.venue,
                row.duration_minutes,
                row.max_marks,
                &row.exam_type,
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
    if let Some(department) = optional_str(params, "department") {
        clauses.push("department = ?");
        args.push(Value::Text(department));
    }
    if let Some(year) = optional_str(params, "year") {
        clauses.push("year = ?");
        args.push(Value::Text(year));
    }
    if let Some(semester) = optional_str(params, "semester") {
        clauses.push("semester = ?");
        args.push(Value::Text(semester));
    }
    if let Some(academic_year) = optional_str(params, "academicYear") {
        clauses.push("academic_year = ?");
        args.push(Value::Text(academic_year));
    }
    if let Some(exam_type) = optional_str(params, "examType") {
        clauses.push("exam_type = ?");
        args.push(Value::Text(exam_type));
    }
    if let Some(start) = optional_date(params, "startDate")? {
        clauses.push("date >= ?");
        args.push(Value::Text(start.to_string()));
    }
    if let Some(end) = optional_date(params, "endDate")? {
        clauses.push("date <= ?");
        args.push(Value::Text(end.to_string()));
    }

    let sql = format!(
        "SELECT {} FROM exams WHERE {} ORDER BY date, time",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "exams": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;
    let id = required_str(params, "id")?;

    let Some(mut row) = fetch(&state.db, &id)? else {
        return Err(HandlerErr::not_found("exam not found"));
    };

    if let Some(v) = optional_str(params, "subjectCode") {
        row.subject_code = v;
    }
    if let Some(v) = optional_str(params, "subject") {
        row.subject = v;
    }
    if let Some(v) = optional_date(params, "date")? {
        row.date = v.to_string();
    }
    if let Some(v) = optional_str(params, "time") {
        row.time = Some(v);
    }
    if let Some(v) = optional_str(params, "venue") {
        row.venue = Some(v);
    }
    if let Some(v) = optional_i64(params, "durationMinutes") {
        row.duration_minutes = Some(v);
    }
    if let Some(v) = optional_f64(params, "maxMarks") {
        row.max_marks = Some(v);
    }
    if let Some(v) = optional_str(params, "examType") {
        row.exam_type = v;
    }

    state
        .db
        .execute(
            "UPDATE exams SET subject_code = ?, subject = ?, date = ?, time = ?, venue = ?,
                 duration_minutes = ?, max_marks = ?, exam_type = ?
             WHERE id = ?",
            (
                &row.subject_code,
                &row.subject,
                &row.date,
                &row.time,
                &row.venue,
                row.duration_minutes,
                row.max_marks,
                &row.exam_type,
                &id,
            ),
        )
        .map_err(db_update)?;

    Ok(row_json(&row))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let id = required_str(&req.params, "id")?;

    let affected = state
        .db
        .execute("DELETE FROM exams WHERE id = ?", [&id])
        .map_err(db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("exam not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.schedule" => schedule(state, req),
        "exams.list" => list(state, req),
        "exams.update" => update(state, req),
        "exams.delete" => delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
