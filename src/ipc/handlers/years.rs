use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(handle_years_list(state, req)),
        "years.upsert" => Some(handle_years_upsert(state, req)),
        _ => None,
    }
}

fn handle_years_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare("SELECT id, name, active FROM academic_years ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let years: Vec<serde_json::Value> = match stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let active: i64 = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "active": active != 0 }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "years": years }))
}

fn handle_years_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be blank", None);
    }
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, name, active)
         VALUES(?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET active = excluded.active",
        (&year_id, name.trim(), active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_years" })),
        );
    }

    // Only one year can be the default scope at a time.
    if active {
        if let Err(e) = conn.execute(
            "UPDATE academic_years SET active = 0 WHERE name != ?",
            [name.trim()],
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "name": name.trim(), "active": active }))
}
