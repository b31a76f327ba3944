use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{db, param_str, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::ErrorCode;
use serde_json::{json, Value};

fn list_programs(state: &AppState) -> ServiceResult<Value> {
    let conn = db(state)?;
    let mut stmt = conn.prepare("SELECT program_id, name FROM programs ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| {
            let program_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "program_id": program_id, "name": name }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn create_program(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let name = param_str(&req.params, "name")?
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        return Err(ServiceError::validation("name is required"));
    }

    let conn = db(state)?;
    match conn.execute("INSERT INTO programs(name) VALUES(?)", [&name]) {
        Ok(_) => Ok(json!({ "program_id": conn.last_insert_rowid(), "name": name })),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(ServiceError::validation(format!(
                "program already exists: {}",
                name
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" => Some(respond(&req.id, list_programs(state))),
        "programs.create" => Some(respond(&req.id, create_program(state, req))),
        _ => None,
    }
}
