use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ScopeKey};
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// The four-tuple every katrol operation is scoped by. `academicYear` may be
/// omitted when an active academic-year row exists.
pub fn parse_scope(conn: &Connection, req: &Request) -> Result<ScopeKey, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let subject = required_str(req, "subject")?;
    let semester = match req.params.get("semester").and_then(|v| v.as_i64()) {
        Some(v) if v >= 1 => v,
        Some(v) => {
            return Err(err(
                &req.id,
                "bad_params",
                "semester must be a positive integer",
                Some(json!({ "semester": v })),
            ));
        }
        None => return Err(err(&req.id, "bad_params", "missing semester", None)),
    };

    let academic_year = match req.params.get("academicYear").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => match store::active_academic_year(conn) {
            Ok(Some(year)) => year,
            Ok(None) => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "missing academicYear and no active academic year is set",
                    None,
                ));
            }
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        },
    };

    Ok(ScopeKey {
        class_id,
        subject,
        semester,
        academic_year,
    })
}
