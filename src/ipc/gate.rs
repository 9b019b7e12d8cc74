use rusqlite::OptionalExtension;

use crate::auth::{self, Role};
use crate::ipc::error::{db_query, HandlerErr};
use crate::ipc::types::{AppState, Request};

/// The verified requester. Constructed only by [`authenticate`]; handlers
/// never look at raw tokens or role strings.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    /// Admin satisfies every role check.
    pub fn require(&self, roles: &[Role]) -> Result<(), HandlerErr> {
        if self.role == Role::Admin || roles.contains(&self.role) {
            return Ok(());
        }
        let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        Err(HandlerErr::forbidden(format!(
            "requires role {}",
            names.join(" or ")
        )))
    }

    /// Mutation rule for created-by resources: the creator or an admin.
    pub fn require_owner_or_admin(&self, owner_id: &str) -> Result<(), HandlerErr> {
        if self.role == Role::Admin || self.user_id == owner_id {
            return Ok(());
        }
        Err(HandlerErr::forbidden("not the owner of this resource"))
    }

    /// Read rule for student-scoped records: the student themselves, or
    /// staff (teacher/admin).
    pub fn require_self_or_staff(&self, student_user_id: &str) -> Result<(), HandlerErr> {
        if self.is_staff() || self.user_id == student_user_id {
            return Ok(());
        }
        Err(HandlerErr::forbidden("students may only access their own records"))
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }
}

/// Student-scoped list filter: staff may pass any studentId (or none);
/// students always get their own id and any other value is refused.
pub fn scoped_student_filter(
    ident: &Identity,
    params: &serde_json::Value,
) -> Result<Option<String>, HandlerErr> {
    let requested = crate::ipc::params::optional_str(params, "studentId");
    if ident.is_staff() {
        return Ok(requested);
    }
    match requested {
        Some(id) if id != ident.user_id => Err(HandlerErr::forbidden(
            "students may only access their own records",
        )),
        _ => Ok(Some(ident.user_id.clone())),
    }
}

/// Token verification, evaluated once per request. Three distinct failure
/// outcomes: no credential at all, a credential that does not verify, and
/// a verified credential whose subject no longer exists.
pub fn authenticate(state: &AppState, req: &Request) -> Result<Identity, HandlerErr> {
    #[cfg(feature = "dev-bypass")]
    if state.cfg.dev_bypass {
        log::warn!("audit: dev-bypass admin identity used for {}", req.method);
        return Ok(Identity {
            user_id: "dev-bypass".to_string(),
            role: Role::Admin,
        });
    }

    let Some(raw) = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(HandlerErr::new("no_token", "no token provided"));
    };
    // Tolerate clients sending the header-style form.
    let raw = raw.strip_prefix("Bearer ").unwrap_or(raw);

    let claims = auth::verify_token(&state.cfg.secret, raw)
        .ok_or_else(|| HandlerErr::new("unauthorized", "invalid or expired token"))?;

    let known: Option<String> = state
        .db
        .query_row("SELECT id FROM users WHERE id = ?", [&claims.sub], |r| r.get(0))
        .optional()
        .map_err(db_query)?;
    if known.is_none() {
        return Err(HandlerErr::not_found("token subject does not exist"));
    }

    Ok(Identity {
        user_id: claims.sub,
        role: claims.role,
    })
}
