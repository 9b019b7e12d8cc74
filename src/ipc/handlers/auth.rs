use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{hash_password, issue_token, verify_password, Role};
use crate::ipc::error::{db_query, db_tx, db_update, ok, HandlerErr};
use crate::ipc::gate;
use crate::ipc::params::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};

use super::students::student_profile_json;
use super::teachers::teacher_profile_json;

// Fallback username from the display name: "Jane Q. Doe" -> "jane.q.doe".
fn derive_username(name: &str) -> String {
    name.to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect()
}

fn profile_json(
    state: &AppState,
    user_id: &str,
    role: Role,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    match role {
        Role::Student => student_profile_json(&state.db, user_id),
        Role::Teacher => teacher_profile_json(&state.db, user_id),
        Role::Admin => Ok(None),
    }
}

fn signup(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let params = &req.params;
    let email = required_str(params, "email")?;
    let password = required_str(params, "password")?;
    let name = required_str(params, "name")?;
    let username = match optional_str(params, "username") {
        Some(u) => u,
        None => derive_username(&name),
    };
    if username.is_empty() {
        return Err(HandlerErr::bad_params("missing username"));
    }
    let role = match optional_str(params, "role") {
        Some(raw) => Role::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("role must be student, teacher or admin"))?,
        None => Role::Student,
    };

    let taken: Option<String> = state
        .db
        .query_row(
            "SELECT id FROM users WHERE username = ? OR email = ?",
            (&username, &email),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query)?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("username or email already registered"));
    }

    let user_id = Uuid::new_v4().to_string();
    let password_hash =
        hash_password(&password).map_err(|e| HandlerErr::internal(e.to_string()))?;
    let created_at = Utc::now().to_rfc3339();

    let tx = state.db.unchecked_transaction().map_err(db_tx)?;
    tx.execute(
        "INSERT INTO users(id, username, email, password_hash, role, last_login, created_at)
         VALUES(?, ?, ?, ?, ?, NULL, ?)",
        (&user_id, &username, &email, &password_hash, role.as_str(), &created_at),
    )
    .map_err(db_update)?;

    match role {
        Role::Student => {
            tx.execute(
                "INSERT INTO students(user_id, name, roll_number, department, year,
                                      current_semester, academic_year, email, phone, gender, address)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &user_id,
                    &name,
                    &optional_str(params, "rollNumber"),
                    &optional_str(params, "department"),
                    &optional_str(params, "year"),
                    &optional_str(params, "currentSemester"),
                    &optional_str(params, "academicYear"),
                    &email,
                    &optional_str(params, "phone"),
                    &optional_str(params, "gender"),
                    &optional_str(params, "address"),
                ),
            )
            .map_err(db_update)?;
        }
        Role::Teacher => {
            tx.execute(
                "INSERT INTO teachers(user_id, name, email, phone, department, designation)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &user_id,
                    &name,
                    &email,
                    &optional_str(params, "phone"),
                    &optional_str(params, "department"),
                    &optional_str(params, "designation"),
                ),
            )
            .map_err(db_update)?;
        }
        Role::Admin => {}
    }
    tx.commit().map_err(db_tx)?;

    Ok(json!({
        "message": "user registered",
        "userId": user_id,
        "username": username,
        "role": role.as_str()
    }))
}

fn signin(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let params = &req.params;
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;

    let row: Option<(String, String, String, String)> = state
        .db
        .query_row(
            "SELECT id, email, password_hash, role FROM users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_query)?;
    let Some((user_id, email, password_hash, role_raw)) = row else {
        return Err(HandlerErr::not_found("user not found"));
    };

    if !verify_password(&password, &password_hash) {
        return Err(HandlerErr::new("unauthorized", "invalid password"));
    }

    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::internal(format!("stored role {:?} is invalid", role_raw)))?;

    state
        .db
        .execute(
            "UPDATE users SET last_login = ? WHERE id = ?",
            (Utc::now().to_rfc3339(), &user_id),
        )
        .map_err(db_update)?;

    let token = issue_token(
        &state.cfg.secret,
        &user_id,
        role,
        state.cfg.token_ttl_hours,
    )
    .map_err(|e| HandlerErr::internal(e.to_string()))?;

    Ok(json!({
        "id": user_id,
        "username": username,
        "email": email,
        "role": role.as_str(),
        "profile": profile_json(state, &user_id, role)?,
        "accessToken": token
    }))
}

fn verify(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ident = gate::authenticate(state, req)?;

    let row: Option<(String, String)> = state
        .db
        .query_row(
            "SELECT username, email FROM users WHERE id = ?",
            [&ident.user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_query)?;
    let Some((username, email)) = row else {
        return Err(HandlerErr::not_found("user not found"));
    };

    Ok(json!({
        "id": ident.user_id,
        "username": username,
        "email": email,
        "role": ident.role.as_str(),
        "profile": profile_json(state, &ident.user_id, ident.role)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.signup" => signup(state, req),
        "auth.signin" => signin(state, req),
        "auth.verify" => verify(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
