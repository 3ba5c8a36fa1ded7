use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_scope};
use crate::ipc::types::{AppState, Request};
use crate::katrol::{run_session, CurveSettings, RawScoreRow, SessionOutcome, Student};
use crate::store::{self, ScopeKey};
use rusqlite::Connection;
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "katrol.preview" => Some(handle_run(state, req, false)),
        "katrol.process" => Some(handle_run(state, req, true)),
        "katrol.results" => Some(handle_results(state, req)),
        _ => None,
    }
}

fn load_session_inputs(
    conn: &Connection,
    req: &Request,
    scope: &ScopeKey,
) -> Result<(Vec<Student>, Vec<RawScoreRow>, CurveSettings), serde_json::Value> {
    let settings = match store::load_settings(conn, &scope.class_id, &scope.subject) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return Err(err(
                &req.id,
                "not_found",
                "curve settings are not configured for this class and subject",
                Some(json!({ "classId": scope.class_id, "subject": scope.subject })),
            ));
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };

    let roster = store::load_roster(conn, &scope.class_id)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let rows = store::load_raw_baseline(conn, scope)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    Ok((roster, rows, settings))
}

fn outcome_json(scope: &ScopeKey, settings: &CurveSettings, outcome: &SessionOutcome) -> serde_json::Value {
    json!({
        "classId": scope.class_id,
        "subject": scope.subject,
        "semester": scope.semester,
        "academicYear": scope.academic_year,
        "settings": settings,
        "periodicTags": outcome.periodic_tags,
        "warnings": outcome.warnings,
        "results": outcome.results,
    })
}

fn handle_run(state: &mut AppState, req: &Request, persist: bool) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match parse_scope(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let (roster, rows, settings) = match load_session_inputs(conn, req, &scope) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let outcome = match run_session(&rows, &roster, &settings) {
        Ok(o) => o,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let mut result = outcome_json(&scope, &settings, &outcome);
    if persist {
        let saved = match store::upsert_results(conn, &scope, &settings, &outcome.results) {
            Ok(n) => n,
            Err(e) => {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "nilai_katrol" })),
                );
            }
        };
        tracing::info!(
            class_id = %scope.class_id,
            subject = %scope.subject,
            semester = scope.semester,
            academic_year = %scope.academic_year,
            students = saved,
            "katrol session persisted"
        );
        result["saved"] = json!(saved);
    }

    ok(&req.id, result)
}

fn handle_results(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match parse_scope(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match store::load_results(conn, &scope) {
        Ok(results) => ok(
            &req.id,
            json!({
                "classId": scope.class_id,
                "subject": scope.subject,
                "semester": scope.semester,
                "academicYear": scope.academic_year,
                "results": results,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
