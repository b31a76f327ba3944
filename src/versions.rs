//! Semester toggling and cleanup restore points.
//!
//! Each operation of [`VersionStore`] runs in a single immediate transaction
//! and either commits completely or leaves storage untouched.

use crate::error::{ServiceError, ServiceResult};
use crate::rollover::{self, begin_immediate, date_string, timestamp_now, RolloverOutcome};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const DEFAULT_CLEANUP_DESCRIPTION: &str = "Automated cleanup";

#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub closed_semester_id: i64,
    pub opened_semester_id: i64,
    pub session_id: i64,
    pub semester_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollover: Option<RolloverOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub version_id: i64,
    pub run_id: String,
    pub level_rows: usize,
    pub semester_rows: usize,
    pub archived_semesters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub version_id: i64,
    pub level_rows: usize,
    pub semester_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupVersion {
    pub version_id: i64,
    pub run_id: String,
    pub run_timestamp: String,
    pub description: String,
    pub level_rows: i64,
    pub semester_rows: i64,
}

pub trait VersionStore {
    /// Closes the open semester and opens the next one. Closing semester 2
    /// runs the full session rollover. Fails with `Procedure` when nothing is
    /// open; rolls back on any error.
    fn toggle_semester(&self, today: NaiveDate) -> ServiceResult<ToggleOutcome>;

    /// Captures levels and semesters as a new restore point, then archives
    /// closed semesters. Rolls back on any error.
    fn end_of_year_cleanup(&self, description: &str) -> ServiceResult<CleanupOutcome>;

    /// Replaces levels and semesters with a captured snapshot. Validation and
    /// lookup failures leave storage untouched.
    fn restore_version(&self, version_id: i64) -> ServiceResult<RestoreOutcome>;

    fn list_versions(&self) -> ServiceResult<Vec<CleanupVersion>>;
}

pub struct SqliteVersionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteVersionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

/// Opens the semester, reopening it if a closed row already exists.
fn activate_semester(
    conn: &Connection,
    session_id: i64,
    semester_number: i64,
    today: NaiveDate,
) -> ServiceResult<i64> {
    let (id, created) = rollover::open_semester(conn, session_id, semester_number, today)?;
    if !created {
        conn.execute(
            "UPDATE semesters SET status = 'open', end_date = NULL
             WHERE semester_id = ? AND status = 'closed'",
            [id],
        )?;
    }
    Ok(id)
}

fn snapshot_checksum(conn: &Connection, version_id: i64) -> ServiceResult<String> {
    let mut hasher = Sha256::new();

    let mut stmt = conn.prepare(
        "SELECT level_id, program_id, level, students_count, promotion_rate
         FROM cleanup_level_snapshots
         WHERE version_id = ?
         ORDER BY level_id",
    )?;
    let mut rows = stmt.query([version_id])?;
    while let Some(r) = rows.next()? {
        let rate: Option<f64> = r.get(4)?;
        let line = format!(
            "L|{}|{}|{}|{}|{}\n",
            r.get::<_, i64>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, i64>(3)?,
            rate.map(|v| v.to_string()).unwrap_or_else(|| "null".into())
        );
        hasher.update(line.as_bytes());
    }

    let mut stmt = conn.prepare(
        "SELECT semester_id, session_id, semester_number, start_date, end_date, status, archived
         FROM cleanup_semester_snapshots
         WHERE version_id = ?
         ORDER BY semester_id",
    )?;
    let mut rows = stmt.query([version_id])?;
    while let Some(r) = rows.next()? {
        let end_date: Option<String> = r.get(4)?;
        let line = format!(
            "S|{}|{}|{}|{}|{}|{}|{}\n",
            r.get::<_, i64>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, String>(3)?,
            end_date.as_deref().unwrap_or("null"),
            r.get::<_, String>(5)?,
            r.get::<_, i64>(6)?
        );
        hasher.update(line.as_bytes());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

impl VersionStore for SqliteVersionStore<'_> {
    fn toggle_semester(&self, today: NaiveDate) -> ServiceResult<ToggleOutcome> {
        let tx = begin_immediate(self.conn)?;

        let current: Option<(i64, i64, i64)> = tx
            .query_row(
                "SELECT semester_id, session_id, semester_number
                 FROM semesters
                 WHERE status = 'open'
                 ORDER BY semester_id DESC
                 LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((closed_id, session_id, number)) = current else {
            return Err(ServiceError::procedure("no open semester to toggle"));
        };

        tx.execute(
            "UPDATE semesters SET status = 'closed', end_date = ? WHERE semester_id = ?",
            params![date_string(today), closed_id],
        )?;

        let outcome = if number == 1 {
            let opened = activate_semester(&tx, session_id, 2, today)?;
            ToggleOutcome {
                closed_semester_id: closed_id,
                opened_semester_id: opened,
                session_id,
                semester_number: 2,
                rollover: None,
            }
        } else {
            let r = rollover::run_rollover(&tx, today)?;
            let opened = activate_semester(&tx, r.session_id, 1, today)?;
            ToggleOutcome {
                closed_semester_id: closed_id,
                opened_semester_id: opened,
                session_id: r.session_id,
                semester_number: 1,
                rollover: Some(r),
            }
        };

        tx.commit()?;
        tracing::info!(
            closed = outcome.closed_semester_id,
            opened = outcome.opened_semester_id,
            session_id = outcome.session_id,
            semester = outcome.semester_number,
            "semester toggled"
        );
        Ok(outcome)
    }

    fn end_of_year_cleanup(&self, description: &str) -> ServiceResult<CleanupOutcome> {
        let description = match description.trim() {
            "" => DEFAULT_CLEANUP_DESCRIPTION,
            d => d,
        };
        let run_id = Uuid::new_v4().to_string();

        let tx = begin_immediate(self.conn)?;
        tx.execute(
            "INSERT INTO cleanup_versions(run_id, run_timestamp, description, checksum)
             VALUES(?, ?, ?, '')",
            params![&run_id, timestamp_now(), description],
        )?;
        let version_id = tx.last_insert_rowid();

        let level_rows = tx.execute(
            "INSERT INTO cleanup_level_snapshots(version_id, level_id, program_id, level, students_count, promotion_rate)
             SELECT ?, id, program_id, level, students_count, promotion_rate FROM levels",
            [version_id],
        )?;
        let semester_rows = tx.execute(
            "INSERT INTO cleanup_semester_snapshots(version_id, semester_id, session_id, semester_number, start_date, end_date, status, archived)
             SELECT ?, semester_id, session_id, semester_number, start_date, end_date, status, archived FROM semesters",
            [version_id],
        )?;

        let checksum = snapshot_checksum(&tx, version_id)?;
        tx.execute(
            "UPDATE cleanup_versions SET checksum = ? WHERE version_id = ?",
            params![&checksum, version_id],
        )?;

        let archived_semesters = tx.execute(
            "UPDATE semesters SET archived = 1 WHERE status = 'closed' AND archived = 0",
            [],
        )?;

        tx.commit()?;
        tracing::info!(
            version_id,
            run_id = %run_id,
            level_rows,
            semester_rows,
            archived_semesters,
            "cleanup version recorded"
        );
        Ok(CleanupOutcome {
            version_id,
            run_id,
            level_rows,
            semester_rows,
            archived_semesters,
        })
    }

    fn restore_version(&self, version_id: i64) -> ServiceResult<RestoreOutcome> {
        if version_id < 1 {
            return Err(ServiceError::validation("valid version_id is required"));
        }

        let tx = begin_immediate(self.conn)?;
        let expected: Option<String> = tx
            .query_row(
                "SELECT checksum FROM cleanup_versions WHERE version_id = ?",
                [version_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(expected) = expected else {
            return Err(ServiceError::not_found(format!(
                "cleanup version {} not found",
                version_id
            )));
        };
        if snapshot_checksum(&tx, version_id)? != expected {
            return Err(ServiceError::procedure(format!(
                "snapshot for version {} failed its checksum",
                version_id
            )));
        }

        tx.execute("DELETE FROM levels", [])?;
        let level_rows = tx.execute(
            "INSERT INTO levels(id, program_id, level, students_count, promotion_rate)
             SELECT level_id, program_id, level, students_count, promotion_rate
             FROM cleanup_level_snapshots
             WHERE version_id = ?",
            [version_id],
        )?;

        tx.execute("DELETE FROM semesters", [])?;
        let semester_rows = tx.execute(
            "INSERT INTO semesters(semester_id, session_id, semester_number, start_date, end_date, status, archived)
             SELECT semester_id, session_id, semester_number, start_date, end_date, status, archived
             FROM cleanup_semester_snapshots
             WHERE version_id = ?",
            [version_id],
        )?;

        tx.commit()?;
        tracing::info!(version_id, level_rows, semester_rows, "cleanup version restored");
        Ok(RestoreOutcome {
            version_id,
            level_rows,
            semester_rows,
        })
    }

    fn list_versions(&self) -> ServiceResult<Vec<CleanupVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT
               v.version_id,
               v.run_id,
               v.run_timestamp,
               v.description,
               (SELECT COUNT(*) FROM cleanup_level_snapshots l WHERE l.version_id = v.version_id),
               (SELECT COUNT(*) FROM cleanup_semester_snapshots s WHERE s.version_id = v.version_id)
             FROM cleanup_versions v
             ORDER BY v.version_id DESC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(CleanupVersion {
                    version_id: r.get(0)?,
                    run_id: r.get(1)?,
                    run_timestamp: r.get(2)?,
                    description: r.get(3)?,
                    level_rows: r.get(4)?,
                    semester_rows: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
