//! Session rollover: sequence the next session, register it, archive level
//! counts, promote students and open the first semester. All steps share the
//! caller's transaction.

use crate::error::ServiceResult;
use chrono::{Datelike, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;

/// Rates are stored to two decimals; keep 0.29 * 100 at 29.
const RATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionYears {
    pub start_year: i64,
    pub end_year: i64,
}

impl SessionYears {
    pub fn name(&self) -> String {
        session_name(self.start_year, self.end_year)
    }
}

pub fn session_name(start_year: i64, end_year: i64) -> String {
    format!("{}/{}", start_year, end_year)
}

pub fn date_string(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Opens an immediate transaction so that two rollovers cannot interleave
/// their reads of the latest session.
pub fn begin_immediate(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

pub fn next_session_years(latest: Option<SessionYears>, current_year: i64) -> SessionYears {
    match latest {
        None => SessionYears {
            start_year: current_year,
            end_year: current_year + 1,
        },
        Some(prev) => SessionYears {
            start_year: prev.start_year + 1,
            end_year: prev.end_year + 1,
        },
    }
}

/// Most recently created session, by id rather than by year.
pub fn latest_session(conn: &Connection) -> ServiceResult<Option<SessionYears>> {
    let row = conn
        .query_row(
            "SELECT start_year, end_year FROM academic_sessions ORDER BY session_id DESC LIMIT 1",
            [],
            |r| {
                Ok(SessionYears {
                    start_year: r.get(0)?,
                    end_year: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn sequence_next_session(conn: &Connection, today: NaiveDate) -> ServiceResult<SessionYears> {
    let latest = latest_session(conn)?;
    Ok(next_session_years(latest, i64::from(today.year())))
}

fn find_session(conn: &Connection, years: SessionYears) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT session_id FROM academic_sessions WHERE start_year = ? AND end_year = ?",
        params![years.start_year, years.end_year],
        |r| r.get(0),
    )
    .optional()
}

/// Returns the session id for `years` and whether this call inserted it.
///
/// Callers hold an immediate transaction, so no other writer can register
/// the same years between the lookup and the insert.
pub fn get_or_create_session(conn: &Connection, years: SessionYears) -> ServiceResult<(i64, bool)> {
    if let Some(id) = find_session(conn, years)? {
        return Ok((id, false));
    }
    conn.execute(
        "INSERT INTO academic_sessions(start_year, end_year) VALUES(?, ?)",
        params![years.start_year, years.end_year],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

/// Appends one history row per level, carrying its current count.
pub fn archive_level_counts(
    conn: &Connection,
    session_id: i64,
    semester_number: i64,
) -> ServiceResult<usize> {
    let n = conn.execute(
        "INSERT INTO level_counts_history(session_id, semester_number, program_id, level, student_count, recorded_at)
         SELECT ?, ?, program_id, level, students_count, ?
         FROM levels
         ORDER BY program_id, level",
        params![session_id, semester_number, timestamp_now()],
    )?;
    Ok(n)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelCount {
    pub program_id: i64,
    pub level: i64,
    pub students_count: i64,
    pub promotion_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    pub program_id: i64,
    pub level: i64,
    pub students_count: i64,
    /// Destination level that has no row yet.
    pub create: bool,
}

pub fn promoted_count(students_count: i64, rate: f64) -> i64 {
    if students_count <= 0 {
        return 0;
    }
    let rate = rate.clamp(0.0, 1.0);
    let promoted = ((students_count as f64) * rate + RATE_EPSILON).floor() as i64;
    promoted.clamp(0, students_count)
}

/// Computes final counts from one consistent read of every level.
///
/// Each level ends at `residual + incoming`: what stayed behind from its own
/// pre-promotion count plus what arrived from the level below. The top level
/// of a program never promotes out. Only changed or new rows are returned.
pub fn plan_promotion(levels: &[LevelCount]) -> Vec<LevelUpdate> {
    let mut max_level: BTreeMap<i64, i64> = BTreeMap::new();
    let mut before: BTreeMap<(i64, i64), i64> = BTreeMap::new();
    for l in levels {
        let m = max_level.entry(l.program_id).or_insert(l.level);
        if l.level > *m {
            *m = l.level;
        }
        before.insert((l.program_id, l.level), l.students_count);
    }

    let mut after = before.clone();
    let mut incoming: BTreeMap<(i64, i64), i64> = BTreeMap::new();
    for l in levels {
        if l.students_count <= 0 || l.level >= max_level[&l.program_id] {
            continue;
        }
        let promoted = promoted_count(l.students_count, l.promotion_rate);
        if promoted == 0 {
            continue;
        }
        after.insert((l.program_id, l.level), l.students_count - promoted);
        *incoming.entry((l.program_id, l.level + 1)).or_insert(0) += promoted;
    }
    for (key, n) in incoming {
        *after.entry(key).or_insert(0) += n;
    }

    after
        .into_iter()
        .filter_map(|((program_id, level), count)| {
            let prev = before.get(&(program_id, level)).copied();
            if prev == Some(count) {
                return None;
            }
            Some(LevelUpdate {
                program_id,
                level,
                students_count: count,
                create: prev.is_none(),
            })
        })
        .collect()
}

pub fn load_level_counts(conn: &Connection) -> ServiceResult<Vec<LevelCount>> {
    let mut stmt = conn.prepare(
        "SELECT program_id, level, students_count, COALESCE(promotion_rate, 1.0)
         FROM levels
         ORDER BY program_id, level",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(LevelCount {
                program_id: r.get(0)?,
                level: r.get(1)?,
                students_count: r.get(2)?,
                promotion_rate: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Promotes every program at once. Returns the number of rows written.
pub fn promote_levels(conn: &Connection) -> ServiceResult<usize> {
    let plan = plan_promotion(&load_level_counts(conn)?);
    for u in &plan {
        if u.create {
            conn.execute(
                "INSERT INTO levels(program_id, level, students_count, promotion_rate)
                 VALUES(?, ?, ?, 1.0)",
                params![u.program_id, u.level, u.students_count],
            )?;
        } else {
            conn.execute(
                "UPDATE levels SET students_count = ? WHERE program_id = ? AND level = ?",
                params![u.students_count, u.program_id, u.level],
            )?;
        }
    }
    Ok(plan.len())
}

/// Opens `semester_number` for the session. An existing row is left as is.
pub fn open_semester(
    conn: &Connection,
    session_id: i64,
    semester_number: i64,
    start_date: NaiveDate,
) -> ServiceResult<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT semester_id FROM semesters WHERE session_id = ? AND semester_number = ?",
            params![session_id, semester_number],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute(
        "INSERT INTO semesters(session_id, semester_number, start_date, status)
         VALUES(?, ?, ?, 'open')",
        params![session_id, semester_number, date_string(start_date)],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloverOutcome {
    pub session_id: i64,
    pub start_year: i64,
    pub end_year: i64,
    pub session_name: String,
    /// False when the session already existed and promotion was skipped.
    pub created: bool,
    pub semester_id: i64,
    pub archived_rows: usize,
    pub promoted_levels: usize,
}

/// Runs the rollover steps on an already open transaction.
pub fn run_rollover(conn: &Connection, today: NaiveDate) -> ServiceResult<RolloverOutcome> {
    let years = sequence_next_session(conn, today)?;
    let (session_id, created) = get_or_create_session(conn, years)?;

    let (archived_rows, promoted_levels) = if created {
        // History must see pre-promotion counts.
        let archived = archive_level_counts(conn, session_id, 1)?;
        let promoted = promote_levels(conn)?;
        (archived, promoted)
    } else {
        tracing::info!(session_id, "session already registered; skipping promotion");
        (0, 0)
    };

    let (semester_id, _) = open_semester(conn, session_id, 1, today)?;

    Ok(RolloverOutcome {
        session_id,
        start_year: years.start_year,
        end_year: years.end_year,
        session_name: years.name(),
        created,
        semester_id,
        archived_rows,
        promoted_levels,
    })
}

/// Creates the next session in its own transaction.
pub fn create_session(conn: &Connection, today: NaiveDate) -> ServiceResult<RolloverOutcome> {
    let tx = begin_immediate(conn)?;
    let outcome = run_rollover(&tx, today)?;
    tx.commit()?;
    tracing::info!(
        session_id = outcome.session_id,
        session = %outcome.session_name,
        archived = outcome.archived_rows,
        promoted = outcome.promoted_levels,
        "session rollover committed"
    );
    Ok(outcome)
}
