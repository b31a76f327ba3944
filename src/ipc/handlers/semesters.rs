use crate::error::ServiceResult;
use crate::ipc::helpers::{db, required_id, respond, today};
use crate::ipc::types::{AppState, Request};
use crate::versions::{SqliteVersionStore, VersionStore};
use serde_json::{json, Value};

fn list_semesters(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let session_id = required_id(&req.params, "session_id")?;
    let conn = db(state)?;
    let mut stmt = conn.prepare(
        "SELECT semester_id, session_id, semester_number, start_date, end_date, status, archived
         FROM semesters
         WHERE session_id = ?
         ORDER BY semester_number",
    )?;
    let rows = stmt
        .query_map([session_id], |row| {
            let semester_id: i64 = row.get(0)?;
            let session_id: i64 = row.get(1)?;
            let semester_number: i64 = row.get(2)?;
            let start_date: String = row.get(3)?;
            let end_date: Option<String> = row.get(4)?;
            let status: String = row.get(5)?;
            let archived: i64 = row.get(6)?;
            Ok(json!({
                "semester_id": semester_id,
                "session_id": session_id,
                "semester_number": semester_number,
                "start_date": start_date,
                "end_date": end_date,
                "status": status,
                "archived": archived != 0
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn toggle_semester(state: &AppState) -> ServiceResult<Value> {
    let conn = db(state)?;
    let o = SqliteVersionStore::new(conn).toggle_semester(today())?;
    Ok(json!({
        "message": "Semester toggled successfully.",
        "closed_semester_id": o.closed_semester_id,
        "opened_semester_id": o.opened_semester_id,
        "session_id": o.session_id,
        "semester_number": o.semester_number,
        "rollover": o.rollover
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.list" => Some(respond(&req.id, list_semesters(state, req))),
        "semesters.toggle" => Some(respond(&req.id, toggle_semester(state))),
        _ => None,
    }
}
