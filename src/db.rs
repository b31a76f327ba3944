use crate::config::DatabaseConfig;
use anyhow::Context;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn db_path(workspace: &Path, cfg: &DatabaseConfig) -> PathBuf {
    workspace.join(&cfg.file_name)
}

pub fn open_db(workspace: &Path, cfg: &DatabaseConfig) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let conn = Connection::open(db_path(workspace, cfg))?;
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            session_id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_year INTEGER NOT NULL,
            end_year INTEGER NOT NULL,
            UNIQUE(start_year, end_year),
            CHECK(end_year = start_year + 1)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            semester_id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            semester_number INTEGER NOT NULL CHECK(semester_number IN (1, 2)),
            start_date TEXT NOT NULL,
            end_date TEXT,
            status TEXT NOT NULL CHECK(status IN ('open', 'closed')),
            archived INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(session_id),
            UNIQUE(session_id, semester_number)
        )",
        [],
    )?;
    ensure_semesters_archived(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semesters_status ON semesters(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            program_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            program_id INTEGER NOT NULL,
            level INTEGER NOT NULL,
            students_count INTEGER NOT NULL DEFAULT 0 CHECK(students_count >= 0),
            promotion_rate REAL CHECK(promotion_rate IS NULL OR (promotion_rate >= 0 AND promotion_rate <= 1)),
            FOREIGN KEY(program_id) REFERENCES programs(program_id),
            UNIQUE(program_id, level)
        )",
        [],
    )?;
    // Workspaces created before partial promotion have no rate column.
    ensure_levels_promotion_rate(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS level_counts_history(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            semester_number INTEGER NOT NULL,
            program_id INTEGER NOT NULL,
            level INTEGER NOT NULL,
            student_count INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(session_id),
            FOREIGN KEY(program_id) REFERENCES programs(program_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_level_counts_history_session
         ON level_counts_history(session_id, semester_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cleanup_versions(
            version_id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            run_timestamp TEXT NOT NULL,
            description TEXT NOT NULL,
            checksum TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cleanup_level_snapshots(
            version_id INTEGER NOT NULL,
            level_id INTEGER NOT NULL,
            program_id INTEGER NOT NULL,
            level INTEGER NOT NULL,
            students_count INTEGER NOT NULL,
            promotion_rate REAL,
            FOREIGN KEY(version_id) REFERENCES cleanup_versions(version_id),
            PRIMARY KEY(version_id, level_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cleanup_semester_snapshots(
            version_id INTEGER NOT NULL,
            semester_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            semester_number INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            status TEXT NOT NULL,
            archived INTEGER NOT NULL,
            FOREIGN KEY(version_id) REFERENCES cleanup_versions(version_id),
            PRIMARY KEY(version_id, semester_id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_levels_promotion_rate(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "levels", "promotion_rate")? {
        return Ok(());
    }
    // NULL reads as full promotion.
    conn.execute("ALTER TABLE levels ADD COLUMN promotion_rate REAL", [])?;
    Ok(())
}

fn ensure_semesters_archived(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "semesters", "archived")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE semesters ADD COLUMN archived INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
