use crate::error::{ServiceError, ServiceResult};
use crate::ipc::helpers::{db, param_i64, required_id, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

fn level_history(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let session_id = required_id(&req.params, "session_id")?;
    let semester_id = required_id(&req.params, "semester_id")?;
    let conn = db(state)?;

    let session: Option<i64> = conn
        .query_row(
            "SELECT session_id FROM academic_sessions WHERE session_id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()?;
    if session.is_none() {
        return Err(ServiceError::not_found("invalid session id"));
    }

    let semester: Option<(i64, i64)> = conn
        .query_row(
            "SELECT session_id, semester_number FROM semesters WHERE semester_id = ?",
            [semester_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((owner, semester_number)) = semester else {
        return Err(ServiceError::not_found("invalid semester id"));
    };
    if owner != session_id {
        return Err(ServiceError::validation(
            "semester_id does not belong to session_id",
        ));
    }

    let mut stmt = conn.prepare(
        "SELECT h.id, h.program_id, p.name, h.level, h.student_count
         FROM level_counts_history h
         JOIN programs p ON p.program_id = h.program_id
         WHERE h.session_id = ? AND h.semester_number = ?
         ORDER BY p.name, h.level",
    )?;
    let rows = stmt
        .query_map(params![session_id, semester_number], |row| {
            let id: i64 = row.get(0)?;
            let program_id: i64 = row.get(1)?;
            let program_name: String = row.get(2)?;
            let level: i64 = row.get(3)?;
            let students_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "program_id": program_id,
                "program_name": program_name,
                "level": level,
                "students_count": students_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn list_levels(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let program_id = param_i64(&req.params, "program_id")?;
    let conn = db(state)?;

    let mut stmt = conn.prepare(
        "SELECT l.id, l.program_id, p.name, l.level, l.students_count, COALESCE(l.promotion_rate, 1.0)
         FROM levels l
         JOIN programs p ON p.program_id = l.program_id
         WHERE ?1 IS NULL OR l.program_id = ?1
         ORDER BY p.name, l.level",
    )?;
    let rows = stmt
        .query_map([program_id], |row| {
            let id: i64 = row.get(0)?;
            let program_id: i64 = row.get(1)?;
            let program_name: String = row.get(2)?;
            let level: i64 = row.get(3)?;
            let students_count: i64 = row.get(4)?;
            let promotion_rate: f64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "program_id": program_id,
                "program_name": program_name,
                "level": level,
                "students_count": students_count,
                "promotion_rate": promotion_rate
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rows))
}

fn set_level(state: &AppState, req: &Request) -> ServiceResult<Value> {
    let program_id = required_id(&req.params, "program_id")?;
    let level = required_id(&req.params, "level")?;
    let students_count = param_i64(&req.params, "students_count")?
        .ok_or_else(|| ServiceError::validation("students_count is required"))?;
    if students_count < 0 {
        return Err(ServiceError::validation("students_count must be >= 0"));
    }
    // Absent keeps the stored rate; null clears it back to full promotion.
    let rate_param = req.params.get("promotion_rate");
    let promotion_rate = match rate_param {
        None | Some(Value::Null) => None,
        Some(v) => {
            let r = v
                .as_f64()
                .ok_or_else(|| ServiceError::validation("promotion_rate must be a number"))?;
            if !(0.0..=1.0).contains(&r) {
                return Err(ServiceError::validation("promotion_rate must be in 0..=1"));
            }
            Some(r)
        }
    };

    let conn = db(state)?;
    let program: Option<i64> = conn
        .query_row(
            "SELECT program_id FROM programs WHERE program_id = ?",
            [program_id],
            |r| r.get(0),
        )
        .optional()?;
    if program.is_none() {
        return Err(ServiceError::not_found("program not found"));
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM levels WHERE program_id = ? AND level = ?",
            params![program_id, level],
            |r| r.get(0),
        )
        .optional()?;

    let (id, created) = match existing {
        Some(id) => {
            if rate_param.is_some() {
                conn.execute(
                    "UPDATE levels SET students_count = ?, promotion_rate = ? WHERE id = ?",
                    params![students_count, promotion_rate, id],
                )?;
            } else {
                conn.execute(
                    "UPDATE levels SET students_count = ? WHERE id = ?",
                    params![students_count, id],
                )?;
            }
            (id, false)
        }
        None => {
            conn.execute(
                "INSERT INTO levels(program_id, level, students_count, promotion_rate)
                 VALUES(?, ?, ?, ?)",
                params![program_id, level, students_count, promotion_rate],
            )?;
            (conn.last_insert_rowid(), true)
        }
    };

    Ok(json!({ "id": id, "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "levels.history" => Some(respond(&req.id, level_history(state, req))),
        "levels.list" => Some(respond(&req.id, list_levels(state, req))),
        "levels.set" => Some(respond(&req.id, set_level(state, req))),
        _ => None,
    }
}
