use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::types::AppState;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;

pub fn db(state: &AppState) -> ServiceResult<&Connection> {
    state.db.as_ref().ok_or(ServiceError::NoWorkspace)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn respond(id: &str, result: ServiceResult<Value>) -> Value {
    match result {
        Ok(data) => ok(id, data),
        Err(e) => service_err(id, &e),
    }
}

/// Integer param that may arrive as a JSON number or a numeric string.
pub fn param_i64(params: &Value, key: &str) -> ServiceResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ServiceError::validation(format!("{} must be an integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ServiceError::validation(format!("{} must be an integer", key))),
        Some(_) => Err(ServiceError::validation(format!("{} must be an integer", key))),
    }
}

/// Positive id, as every table uses autoincrement keys starting at 1.
pub fn required_id(params: &Value, key: &str) -> ServiceResult<i64> {
    match param_i64(params, key)? {
        None => Err(ServiceError::validation(format!("{} is required", key))),
        Some(v) if v < 1 => Err(ServiceError::validation(format!("{} must be >= 1", key))),
        Some(v) => Ok(v),
    }
}

pub fn param_str<'a>(params: &'a Value, key: &str) -> ServiceResult<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ServiceError::validation(format!("{} must be a string", key))),
    }
}
