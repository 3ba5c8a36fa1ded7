use crate::export::{periodic_tags_from_results, result_rows};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_scope};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.rows" => Some(handle_export_rows(state, req)),
        _ => None,
    }
}

fn handle_export_rows(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match parse_scope(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let persisted = match store::load_results(conn, &scope) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if persisted.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no processed results for this scope; run katrol.process first",
            Some(json!({
                "classId": scope.class_id,
                "subject": scope.subject,
                "semester": scope.semester,
                "academicYear": scope.academic_year,
            })),
        );
    }

    let results: Vec<_> = persisted.iter().map(|p| p.result.clone()).collect();
    let periodic_tags = periodic_tags_from_results(&results);
    let table = result_rows(&results, &periodic_tags);

    ok(
        &req.id,
        json!({
            "classId": scope.class_id,
            "subject": scope.subject,
            "semester": scope.semester,
            "academicYear": scope.academic_year,
            "periodicTags": periodic_tags,
            "headers": table.headers,
            "rows": table.rows,
        }),
    )
}
