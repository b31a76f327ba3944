use crate::error::ServiceError;
use serde_json::json;

pub fn ok(id: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "status": "success",
        "data": data
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut resp = json!({
        "id": id,
        "status": "error",
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        resp["details"] = d;
    }
    resp
}

/// Response for a line that could not be parsed; there is no id to echo.
pub fn bad_json(message: impl Into<String>) -> serde_json::Value {
    json!({
        "id": null,
        "status": "error",
        "code": "bad_json",
        "message": message.into(),
    })
}

pub fn service_err(id: &str, e: &ServiceError) -> serde_json::Value {
    match e {
        ServiceError::Storage(inner) => {
            tracing::warn!(request_id = id, error = %inner, "storage failure");
        }
        ServiceError::Backup(inner) => {
            tracing::warn!(request_id = id, error = %inner, "backup failure");
        }
        _ => {}
    }
    err(id, e.code(), e.to_string(), None)
}
