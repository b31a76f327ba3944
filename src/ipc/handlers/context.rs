//! Active session/semester is held by the client; this only validates it.

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{param_i64, respond};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const INVALID_CONTEXT: &str = "Valid session_id & semester_number required.";

fn switch_context(req: &Request) -> ServiceResult<Value> {
    let invalid = |_: ServiceError| ServiceError::validation(INVALID_CONTEXT);
    let session_id = param_i64(&req.params, "session_id").map_err(invalid)?;
    let semester_number = param_i64(&req.params, "semester_number").map_err(invalid)?;
    match (session_id, semester_number) {
        (Some(sid), Some(sem)) if sid >= 1 && (sem == 1 || sem == 2) => Ok(json!({
            "active_session": sid,
            "active_semester": sem
        })),
        _ => Err(ServiceError::validation(INVALID_CONTEXT)),
    }
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "context.switch" => Some(respond(&req.id, switch_context(req))),
        _ => None,
    }
}
