use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{db, param_i64, param_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::versions::{SqliteVersionStore, VersionStore};
use serde_json::{json, Value};

fn run_cleanup(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let description = param_str(&req.params, "description")?.unwrap_or_default();
    let conn = db(state)?;
    let o = SqliteVersionStore::new(conn).end_of_year_cleanup(description)?;
    Ok(json!({
        "message": "Cleanup procedure executed.",
        "version_id": o.version_id,
        "run_id": o.run_id,
        "level_rows": o.level_rows,
        "semester_rows": o.semester_rows,
        "archived_semesters": o.archived_semesters
    }))
}

fn restore_version(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let version_id = param_i64(&req.params, "version_id")?.unwrap_or(0);
    if version_id < 1 {
        return Err(ServiceError::validation("valid version_id is required"));
    }
    let conn = db(state)?;
    let o = SqliteVersionStore::new(conn).restore_version(version_id)?;
    Ok(json!({
        "message": format!("Restored to version {}", o.version_id),
        "version_id": o.version_id,
        "level_rows": o.level_rows,
        "semester_rows": o.semester_rows
    }))
}

fn list_versions(state: &AppState) -> ServiceResult<Value> {
    let conn = db(state)?;
    let versions = SqliteVersionStore::new(conn).list_versions()?;
    Ok(json!(versions))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "versions.cleanup" => Some(respond(&req.id, run_cleanup(state, req))),
        "versions.restore" => Some(respond(&req.id, restore_version(state, req))),
        "versions.list" => Some(respond(&req.id, list_versions(state))),
        _ => None,
    }
}
