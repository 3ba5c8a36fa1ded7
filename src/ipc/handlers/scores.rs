use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_scope};
use crate::ipc::types::{AppState, Request};
use crate::katrol;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const SCORES_SAVE_MAX_EDITS: usize = 5000;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.save" => Some(handle_scores_save(state, req)),
        "scores.list" => Some(handle_scores_list(state, req)),
        _ => None,
    }
}

fn handle_scores_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match parse_scope(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits array", None);
    };
    if edits.len() > SCORES_SAVE_MAX_EDITS {
        return err(
            &req.id,
            "bad_params",
            "too many edits in one request",
            Some(json!({ "count": edits.len(), "max": SCORES_SAVE_MAX_EDITS })),
        );
    }

    let now = Utc::now().to_rfc3339();
    let mut saved = 0usize;
    for (i, edit) in edits.iter().enumerate() {
        let nisn = edit.get("nisn").and_then(|v| v.as_str()).unwrap_or("").trim();
        if nisn.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "each edit needs a nisn",
                Some(json!({ "index": i })),
            );
        }
        let tag = edit
            .get("assessmentType")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if !katrol::is_known_tag(tag) {
            return err(
                &req.id,
                "bad_params",
                "assessmentType must be NH1..NHn, UTS or UAS",
                Some(json!({ "index": i, "assessmentType": tag })),
            );
        }
        let score = match edit.get("score") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_f64() {
                Some(n) if (0.0..=100.0).contains(&n) => Some(n),
                Some(n) => {
                    return err(
                        &req.id,
                        "bad_params",
                        "score must be within 0..=100",
                        Some(json!({ "index": i, "score": n })),
                    );
                }
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "score must be a number or null",
                        Some(json!({ "index": i })),
                    );
                }
            },
        };

        let known: Option<String> = match conn
            .query_row(
                "SELECT nisn FROM students WHERE nisn = ? AND class_id = ?",
                (nisn, &scope.class_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if known.is_none() {
            return err(
                &req.id,
                "not_found",
                "student not found in class",
                Some(json!({ "index": i, "nisn": nisn, "classId": scope.class_id })),
            );
        }

        let row_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO nilai(
                 id, nisn, class_id, subject, semester, academic_year,
                 assessment_type, score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(nisn, class_id, subject, semester, academic_year, assessment_type)
             DO UPDATE SET
               score = excluded.score,
               updated_at = excluded.updated_at",
            rusqlite::params![
                row_id,
                nisn,
                scope.class_id,
                scope.subject,
                scope.semester,
                scope.academic_year,
                tag,
                score,
                now,
            ],
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "nilai", "nisn": nisn })),
            );
        }
        saved += 1;
    }

    ok(&req.id, json!({ "saved": saved }))
}

fn handle_scores_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match parse_scope(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT nisn, assessment_type, score, updated_at FROM nilai
         WHERE class_id = ? AND subject = ? AND semester = ? AND academic_year = ?
         ORDER BY nisn, assessment_type",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<serde_json::Value> = match stmt
        .query_map(
            (
                &scope.class_id,
                &scope.subject,
                scope.semester,
                &scope.academic_year,
            ),
            |r| {
                let nisn: String = r.get(0)?;
                let tag: String = r.get(1)?;
                let score: Option<f64> = r.get(2)?;
                let updated_at: Option<String> = r.get(3)?;
                Ok(json!({
                    "nisn": nisn,
                    "assessmentType": tag,
                    "score": score,
                    "updatedAt": updated_at
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "classId": scope.class_id,
            "subject": scope.subject,
            "semester": scope.semester,
            "academicYear": scope.academic_year,
            "rows": rows
        }),
    )
}
