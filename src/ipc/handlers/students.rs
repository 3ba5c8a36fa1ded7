use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;

const STUDENTS_UPSERT_MAX_ROWS: usize = 2000;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.upsert" => Some(handle_students_upsert(state, req)),
        _ => None,
    }
}

fn handle_students_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT nisn, name, active FROM students
         WHERE class_id = ?
         ORDER BY name, nisn",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students: Vec<serde_json::Value> = match stmt
        .query_map([&class_id], |r| {
            let nisn: String = r.get(0)?;
            let name: String = r.get(1)?;
            let active: i64 = r.get(2)?;
            Ok(json!({ "nisn": nisn, "name": name, "active": active != 0 }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "classId": class_id, "students": students }))
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(rows) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing students array", None);
    };
    if rows.len() > STUDENTS_UPSERT_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            "too many students in one request",
            Some(json!({ "count": rows.len(), "max": STUDENTS_UPSERT_MAX_ROWS })),
        );
    }

    let now = Utc::now().to_rfc3339();
    let mut saved = 0usize;
    for (i, row) in rows.iter().enumerate() {
        let nisn = row.get("nisn").and_then(|v| v.as_str()).unwrap_or("").trim();
        let name = row.get("name").and_then(|v| v.as_str()).unwrap_or("").trim();
        let class_id = row
            .get("classId")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if nisn.is_empty() || name.is_empty() || class_id.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "each student needs nisn, name and classId",
                Some(json!({ "index": i })),
            );
        }
        let active = row.get("active").and_then(|v| v.as_bool()).unwrap_or(true);

        if let Err(e) = conn.execute(
            "INSERT INTO students(nisn, name, class_id, active, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(nisn) DO UPDATE SET
               name = excluded.name,
               class_id = excluded.class_id,
               active = excluded.active,
               updated_at = excluded.updated_at",
            (nisn, name, class_id, active as i64, &now),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "students", "nisn": nisn })),
            );
        }
        saved += 1;
    }

    ok(&req.id, json!({ "saved": saved }))
}
