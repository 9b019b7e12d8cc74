use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_tx, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_amount, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

use super::students::student_exists;

const RESULT_STATUSES: [&str; 4] = ["PASS", "FAIL", "ABSENT", "WITHHELD"];

#[derive(Debug, Clone)]
struct ResultRow {
    student_id: String,
    semester: String,
    academic_year: String,
    subject_code: String,
    subject_name: Option<String>,
    cia_marks: f64,
    semester_marks: f64,
    total_marks: f64,
    grade: String,
    result_status: String,
}

const SELECT_COLS: &str = "student_id, semester, academic_year, subject_code, subject_name,
                           cia_marks, semester_marks, total_marks, grade, result_status";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        student_id: r.get(0)?,
        semester: r.get(1)?,
        academic_year: r.get(2)?,
        subject_code: r.get(3)?,
        subject_name: r.get(4)?,
        cia_marks: r.get(5)?,
        semester_marks: r.get(6)?,
        total_marks: r.get(7)?,
        grade: r.get(8)?,
        result_status: r.get(9)?,
    })
}

fn row_json(row: &ResultRow) -> serde_json::Value {
    json!({
        "studentId": row.student_id,
        "semester": row.semester,
        "academicYear": row.academic_year,
        "subjectCode": row.subject_code,
        "subjectName": row.subject_name,
        "ciaMarks": row.cia_marks,
        "semesterMarks": row.semester_marks,
        "totalMarks": row.total_marks,
        "grade": row.grade,
        "resultStatus": row.result_status
    })
}

// totalMarks is always recomputed from the components; a caller-supplied
// total is discarded.
fn parse_entry(entry: &serde_json::Value) -> Result<ResultRow, HandlerErr> {
    let cia_marks = required_amount(entry, "ciaMarks")?;
    let semester_marks = required_amount(entry, "semesterMarks")?;
    let result_status = required_str(entry, "resultStatus")?.to_ascii_uppercase();
    if !RESULT_STATUSES.contains(&result_status.as_str()) {
        return Err(HandlerErr::bad_params(
            "resultStatus must be PASS, FAIL, ABSENT or WITHHELD",
        ));
    }
    Ok(ResultRow {
        student_id: required_str(entry, "studentId")?,
        semester: required_str(entry, "semester")?,
        academic_year: required_str(entry, "academicYear")?,
        subject_code: required_str(entry, "subjectCode")?,
        subject_name: optional_str(entry, "subjectName"),
        cia_marks,
        semester_marks,
        total_marks: ledger::result_total(cia_marks, semester_marks),
        grade: required_str(entry, "grade")?,
        result_status,
    })
}

fn write_row(conn: &Connection, row: &ResultRow) -> Result<(), HandlerErr> {
    if !student_exists(conn, &row.student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    conn.execute(
        "INSERT INTO results(student_id, semester, academic_year, subject_code, subject_name,
                             cia_marks, semester_marks, total_marks, grade, result_status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester, academic_year, subject_code) DO UPDATE SET
           subject_name = excluded.subject_name,
           cia_marks = excluded.cia_marks,
           semester_marks = excluded.semester_marks,
           total_marks = excluded.total_marks,
           grade = excluded.grade,
           result_status = excluded.result_status",
        (
            &row.student_id,
            &row.semester,
            &row.academic_year,
            &row.subject_code,
            &row.subject_name,
            row.cia_marks,
            row.semester_marks,
            row.total_marks,
            &row.grade,
            &row.result_status,
        ),
    )
    .map_err(db_update)?;
    Ok(())
}

fn upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;

    let row = parse_entry(&req.params)?;
    write_row(&state.db, &row)?;
    Ok(row_json(&row))
}

fn bulk_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;

    let Some(entries) = req.params.get("results").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing results"));
    };
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("results must be a non-empty array"));
    }

    // All rows parse before anything is written; one bad entry fails the lot.
    let rows = entries
        .iter()
        .map(parse_entry)
        .collect::<Result<Vec<_>, _>>()?;

    let tx = state.db.unchecked_transaction().map_err(db_tx)?;
    for row in &rows {
        write_row(&tx, row)?;
    }
    tx.commit().map_err(db_tx)?;

    Ok(json!({
        "count": rows.len(),
        "results": rows.iter().map(row_json).collect::<Vec<_>>()
    }))
}

fn by_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let student_id = required_str(params, "studentId")?;
    ident.require_self_or_staff(&student_id)?;

    let mut clauses: Vec<&str> = vec!["student_id = ?"];
    let mut args: Vec<Value> = vec![Value::Text(student_id.clone())];
    if let Some(semester) = optional_str(params, "semester") {
        clauses.push("semester = ?");
        args.push(Value::Text(semester));
    }
    if let Some(academic_year) = optional_str(params, "academicYear") {
        clauses.push("academic_year = ?");
        args.push(Value::Text(academic_year));
    }

    let sql = format!(
        "SELECT {} FROM results WHERE {}
         ORDER BY academic_year DESC, semester DESC, subject_code",
        SELECT_COLS,
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "results": rows.iter().map(row_json).collect::<Vec<_>>() }))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let affected = state
        .db
        .execute(
            "DELETE FROM results
             WHERE student_id = ? AND semester = ? AND academic_year = ? AND subject_code = ?",
            (
                &required_str(params, "studentId")?,
                &required_str(params, "semester")?,
                &required_str(params, "academicYear")?,
                &required_str(params, "subjectCode")?,
            ),
        )
        .map_err(db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("result not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn gpa(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let student_id = required_str(params, "studentId")?;
    let semester = required_str(params, "semester")?;
    let academic_year = required_str(params, "academicYear")?;
    ident.require_self_or_staff(&student_id)?;

    let mut stmt = state
        .db
        .prepare(
            "SELECT grade FROM results
             WHERE student_id = ? AND semester = ? AND academic_year = ?",
        )
        .map_err(db_query)?;
    let grades = stmt
        .query_map((&student_id, &semester, &academic_year), |r| {
            r.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let Some(value) = ledger::gpa(grades.iter().map(String::as_str)) else {
        return Err(HandlerErr::not_found(
            "no results for this student in the given semester and academic year",
        ));
    };

    Ok(json!({
        "studentId": student_id,
        "semester": semester,
        "academicYear": academic_year,
        "gpa": value,
        "totalSubjects": grades.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "results.upsert" => upsert(state, req),
        "results.bulkUpsert" => bulk_upsert(state, req),
        "results.byStudent" => by_student(state, req),
        "results.delete" => delete(state, req),
        "results.gpa" => gpa(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
