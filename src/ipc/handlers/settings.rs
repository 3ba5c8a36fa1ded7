use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::katrol::CurveSettings;
use crate::store;
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.upsert" => Some(handle_settings_upsert(state, req)),
        _ => None,
    }
}

fn handle_settings_get(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::load_settings(conn, &class_id, &subject) {
        Ok(settings) => ok(
            &req.id,
            json!({
                "classId": class_id,
                "subject": subject,
                "settings": settings
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kkm = match req.params.get("kkm").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing kkm", None),
    };
    let max_curved = match req.params.get("maxCurved").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing maxCurved", None),
    };

    let settings = CurveSettings { kkm, max_curved };
    if let Err(e) = settings.validate() {
        return err(&req.id, &e.code, e.message, e.details);
    }

    match store::upsert_settings(conn, &class_id, &subject, &settings) {
        Ok(()) => ok(
            &req.id,
            json!({
                "classId": class_id,
                "subject": subject,
                "settings": settings
            }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}
