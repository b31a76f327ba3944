use crate::backup;
use crate::db;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{param_str, respond};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> ServiceResult<PathBuf> {
    match param_str(&req.params, key)? {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(ServiceError::validation(format!("{} is required", key))),
    }
}

fn export_backup(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let out_path = required_path(req, "out_path")?;
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(ServiceError::NoWorkspace);
    };

    let db_path = db::db_path(workspace, &state.config.database);
    let export =
        backup::export_workspace_bundle(&db_path, &out_path).map_err(ServiceError::Backup)?;
    tracing::info!(path = %out_path.display(), "workspace backup exported");

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundle_format": export.bundle_format,
        "entry_count": export.entry_count
    }))
}

fn import_backup(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let in_path = required_path(req, "in_path")?;
    let Some(workspace) = state.workspace.clone() else {
        return Err(ServiceError::NoWorkspace);
    };
    if !in_path.is_file() {
        return Err(ServiceError::not_found(format!(
            "backup file not found: {}",
            in_path.to_string_lossy()
        )));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let db_path = db::db_path(&workspace, &state.config.database);
    let imported = backup::import_workspace_bundle(&in_path, &db_path);
    // A failed import leaves the old file in place; reopen it either way.
    let conn = db::open_db(&workspace, &state.config.database).map_err(ServiceError::Backup)?;
    state.db = Some(conn);
    let import = imported.map_err(ServiceError::Backup)?;
    tracing::info!(path = %in_path.display(), format = %import.bundle_format_detected, "workspace backup imported");

    Ok(json!({
        "workspace_path": workspace.to_string_lossy(),
        "bundle_format_detected": import.bundle_format_detected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.exportBackup" => Some(respond(&req.id, export_backup(state, req))),
        "workspace.importBackup" => Some(respond(&req.id, import_backup(state, req))),
        _ => None,
    }
}
