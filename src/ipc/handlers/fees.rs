use chrono::{NaiveDate, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::auth::Role;
use crate::ipc::error::{db_query, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, parse_date, required_amount, required_date, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

use super::students::student_exists;

#[derive(Debug, Clone)]
struct FeeRow {
    student_id: String,
    semester: String,
    academic_year: String,
    total_fee: f64,
    paid: f64,
    balance: f64,
    due_date: String,
    last_payment_date: Option<String>,
    payment_reference: Option<String>,
}

const SELECT_COLS: &str = "student_id, semester, academic_year, total_fee, paid, balance,
                           due_date, last_payment_date, payment_reference";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    Ok(FeeRow {
        student_id: r.get(0)?,
        semester: r.get(1)?,
        academic_year: r.get(2)?,
        total_fee: r.get(3)?,
        paid: r.get(4)?,
        balance: r.get(5)?,
        due_date: r.get(6)?,
        last_payment_date: r.get(7)?,
        payment_reference: r.get(8)?,
    })
}

// Status is re-derived from balance and due date whenever a row leaves the
// daemon, so Overdue needs no background job.
fn row_json(row: &FeeRow, as_of: NaiveDate) -> serde_json::Value {
    let due = NaiveDate::parse_from_str(&row.due_date, "%Y-%m-%d").ok();
    let status = ledger::fee_status(row.balance, due, as_of);
    json!({
        "studentId": row.student_id,
        "semester": row.semester,
        "academicYear": row.academic_year,
        "totalFee": row.total_fee,
        "paid": row.paid,
        "balance": row.balance,
        "status": status.as_str(),
        "dueDate": row.due_date,
        "lastPaymentDate": row.last_payment_date,
        "paymentReference": row.payment_reference
    })
}

fn fetch(
    conn: &Connection,
    student_id: &str,
    semester: &str,
    academic_year: &str,
) -> Result<Option<FeeRow>, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM fees WHERE student_id = ? AND semester = ? AND academic_year = ?",
            SELECT_COLS
        ),
        (student_id, semester, academic_year),
        map_row,
    )
    .optional()
    .map_err(db_query)
}

fn write_row(conn: &Connection, row: &FeeRow, as_of: NaiveDate) -> Result<(), HandlerErr> {
    let due = parse_date(&row.due_date, "dueDate").ok();
    let status = ledger::fee_status(row.balance, due, as_of);
    conn.execute(
        "INSERT INTO fees(student_id, semester, academic_year, total_fee, paid, balance,
                          status, due_date, last_payment_date, payment_reference)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester, academic_year) DO UPDATE SET
           total_fee = excluded.total_fee,
           paid = excluded.paid,
           balance = excluded.balance,
           status = excluded.status,
           due_date = excluded.due_date,
           last_payment_date = excluded.last_payment_date,
           payment_reference = excluded.payment_reference",
        (
            &row.student_id,
            &row.semester,
            &row.academic_year,
            row.total_fee,
            row.paid,
            row.balance,
            status.as_str(),
            &row.due_date,
            &row.last_payment_date,
            &row.payment_reference,
        ),
    )
    .map_err(db_update)?;
    Ok(())
}

// Balance and status are always recomputed; caller-supplied values for
// either are ignored.
fn upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let student_id = required_str(params, "studentId")?;
    let semester = required_str(params, "semester")?;
    let academic_year = required_str(params, "academicYear")?;
    let total_fee = required_amount(params, "totalFee")?;
    let paid = required_amount(params, "paid")?;
    let due_date = required_date(params, "dueDate")?;

    if !student_exists(&state.db, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let existing = fetch(&state.db, &student_id, &semester, &academic_year)?;
    let row = FeeRow {
        student_id,
        semester,
        academic_year,
        total_fee,
        paid,
        balance: ledger::fee_balance(total_fee, paid),
        due_date: due_date.to_string(),
        last_payment_date: Some(Utc::now().to_rfc3339()),
        payment_reference: existing.and_then(|e| e.payment_reference),
    };

    let today = Utc::now().date_naive();
    write_row(&state.db, &row, today)?;
    Ok(row_json(&row, today))
}

fn record_payment(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let student_id = required_str(params, "studentId")?;
    let semester = required_str(params, "semester")?;
    let academic_year = required_str(params, "academicYear")?;
    let amount = required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let reference = required_str(params, "paymentReference")?;

    let Some(mut row) = fetch(&state.db, &student_id, &semester, &academic_year)? else {
        return Err(HandlerErr::not_found("fee record not found"));
    };

    row.paid += amount;
    row.balance = ledger::fee_balance(row.total_fee, row.paid);
    row.last_payment_date = Some(Utc::now().to_rfc3339());
    row.payment_reference = Some(reference);

    let today = Utc::now().date_naive();
    write_row(&state.db, &row, today)?;
    Ok(row_json(&row, today))
}

fn by_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let student_id = required_str(&req.params, "studentId")?;
    ident.require_self_or_staff(&student_id)?;

    let mut stmt = state
        .db
        .prepare(&format!(
            "SELECT {} FROM fees WHERE student_id = ?
             ORDER BY academic_year DESC, semester DESC",
            SELECT_COLS
        ))
        .map_err(db_query)?;
    let rows = stmt
        .query_map([&student_id], map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let today = Utc::now().date_naive();
    Ok(json!({ "fees": rows.iter().map(|r| row_json(r, today)).collect::<Vec<_>>() }))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    let params = &req.params;
    let student_id = required_str(params, "studentId")?;
    let semester = required_str(params, "semester")?;
    let academic_year = required_str(params, "academicYear")?;
    ident.require_self_or_staff(&student_id)?;

    match fetch(&state.db, &student_id, &semester, &academic_year)? {
        Some(row) => Ok(row_json(&row, Utc::now().date_naive())),
        None => Err(HandlerErr::not_found("fee record not found")),
    }
}

// Unpaid rows, soonest due first. The stored status column is not
// consulted; balance is the invariant.
fn pending(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let mut clauses: Vec<&str> = vec!["f.balance > 0"];
    let mut args: Vec<Value> = Vec::new();
    if let Some(department) = optional_str(params, "department") {
        clauses.push("s.department = ?");
        args.push(Value::Text(department));
    }
    if let Some(year) = optional_str(params, "year") {
        clauses.push("s.year = ?");
        args.push(Value::Text(year));
    }

    let sql = format!(
        "SELECT f.student_id, f.semester, f.academic_year, f.total_fee, f.paid, f.balance,
                f.due_date, f.last_payment_date, f.payment_reference
         FROM fees f JOIN students s ON s.user_id = f.student_id
         WHERE {} ORDER BY f.due_date",
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let today = Utc::now().date_naive();
    Ok(json!({ "fees": rows.iter().map(|r| row_json(r, today)).collect::<Vec<_>>() }))
}

fn summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;
    ident.require(&[Role::Admin])?;
    let params = &req.params;

    let department = required_str(params, "department")?;
    let year = required_str(params, "year")?;
    let academic_year = required_str(params, "academicYear")?;
    let semester = optional_str(params, "semester");

    let mut clauses = vec![
        "s.department = ?".to_string(),
        "s.year = ?".to_string(),
        "f.academic_year = ?".to_string(),
    ];
    let mut args: Vec<Value> = vec![
        Value::Text(department),
        Value::Text(year),
        Value::Text(academic_year),
    ];
    if let Some(semester) = semester {
        clauses.push("f.semester = ?".to_string());
        args.push(Value::Text(semester));
    }

    let sql = format!(
        "SELECT f.student_id, f.semester, f.academic_year, f.total_fee, f.paid, f.balance,
                f.due_date, f.last_payment_date, f.payment_reference
         FROM fees f JOIN students s ON s.user_id = f.student_id
         WHERE {}",
        clauses.join(" AND ")
    );
    let mut stmt = state.db.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(args), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let today = Utc::now().date_naive();
    let mut total_fee_sum = 0.0;
    let mut paid_sum = 0.0;
    let mut balance_sum = 0.0;
    let mut paid_count = 0u64;
    let mut pending_count = 0u64;
    let mut overdue_count = 0u64;
    for row in &rows {
        total_fee_sum += row.total_fee;
        paid_sum += row.paid;
        balance_sum += row.balance;
        let due = NaiveDate::parse_from_str(&row.due_date, "%Y-%m-%d").ok();
        match ledger::fee_status(row.balance, due, today) {
            ledger::FeeStatus::Paid => paid_count += 1,
            ledger::FeeStatus::Pending => pending_count += 1,
            ledger::FeeStatus::Overdue => overdue_count += 1,
        }
    }

    Ok(json!({
        "totalFeeSum": total_fee_sum,
        "paidSum": paid_sum,
        "balanceSum": balance_sum,
        "studentCount": rows.len(),
        "paidCount": paid_count,
        "pendingCount": pending_count,
        "overdueCount": overdue_count
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "fees.upsert" => upsert(state, req),
        "fees.recordPayment" => record_payment(state, req),
        "fees.byStudent" => by_student(state, req),
        "fees.get" => get(state, req),
        "fees.pending" => pending(state, req),
        "fees.summary" => summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
