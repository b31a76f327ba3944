use crate::error::ServiceResult;
use crate::ipc::helpers::{db, respond, today};
use crate::ipc::types::{AppState, Request};
use crate::rollover;
use serde_json::{json, Value};

fn list_sessions(state: &AppState) -> ServiceResult<Value> {
    let conn = db(state)?;
    let mut stmt = conn.prepare(
        "SELECT session_id, start_year, end_year
         FROM academic_sessions
         ORDER BY start_year DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let session_id: i64 = row.get(0)?;
            let start_year: i64 = row.get(1)?;
            let end_year: i64 = row.get(2)?;
            Ok(json!({
                "session_id": session_id,
                "start_year": start_year,
                "end_year": end_year,
                "session_name": rollover::session_name(start_year, end_year)
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn create_session(state: &AppState) -> ServiceResult<Value> {
    let conn = db(state)?;
    let outcome = rollover::create_session(conn, today())?;
    Ok(json!(outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(respond(&req.id, list_sessions(state))),
        "sessions.create" => Some(respond(&req.id, create_session(state))),
        _ => None,
    }
}
