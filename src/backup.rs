//! Workspace bundles: a zip holding `manifest.json` and the SQLite file.
//!
//! Imports are staged next to the live database and only swapped in once the
//! staged file opens as an intact SQLite database.

use anyhow::{anyhow, bail, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/sessiond.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "sessiond-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackupKind {
    Bundle,
    RawSqlite,
}

impl BackupKind {
    fn format(self) -> &'static str {
        match self {
            BackupKind::Bundle => BUNDLE_FORMAT_V1,
            BackupKind::RawSqlite => RAW_SQLITE_FORMAT,
        }
    }
}

pub fn export_workspace_bundle(db_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if !db_path.is_file() {
        bail!("no database to export at {}", db_path.display());
    }
    if let Some(dir) = out_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": crate::rollover::timestamp_now(),
    });
    let manifest = serde_json::to_vec_pretty(&manifest)?;

    let file =
        File::create(out_path).with_context(|| format!("cannot write {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)?;
    zip.write_all(&manifest)?;

    zip.start_file(DB_ENTRY, opts)?;
    let mut db = File::open(db_path)
        .with_context(|| format!("cannot read database {}", db_path.display()))?;
    std::io::copy(&mut db, &mut zip).context("copying database into bundle")?;
    zip.finish().context("finishing bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
    })
}

/// Replaces `db_path` with the database carried by `in_path`, which may be a
/// bundle or a plain SQLite file. On any error the existing database is left
/// as it was.
pub fn import_workspace_bundle(in_path: &Path, db_path: &Path) -> anyhow::Result<ImportSummary> {
    let kind = sniff_backup(in_path)?;
    if let Some(dir) = db_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let staged = staging_path(db_path);
    let prepared = stage_database(kind, in_path, &staged).and_then(|()| verify_database(&staged));
    if let Err(e) = prepared {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    if db_path.exists() {
        fs::remove_file(db_path)
            .with_context(|| format!("cannot replace {}", db_path.display()))?;
    }
    fs::rename(&staged, db_path)
        .with_context(|| format!("cannot move staged database to {}", db_path.display()))?;

    Ok(ImportSummary {
        bundle_format_detected: kind.format().to_string(),
    })
}

fn staging_path(db_path: &Path) -> PathBuf {
    db_path.with_extension("importing")
}

fn sniff_backup(path: &Path) -> anyhow::Result<BackupKind> {
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("cannot read {}", path.display()))?;

    if head.starts_with(ZIP_MAGIC) {
        Ok(BackupKind::Bundle)
    } else if head == SQLITE_MAGIC {
        Ok(BackupKind::RawSqlite)
    } else {
        Err(anyhow!(
            "{} is neither a sessiond bundle nor a SQLite database",
            path.display()
        ))
    }
}

fn stage_database(kind: BackupKind, in_path: &Path, staged: &Path) -> anyhow::Result<()> {
    match kind {
        BackupKind::RawSqlite => {
            fs::copy(in_path, staged)
                .with_context(|| format!("cannot stage {}", in_path.display()))?;
        }
        BackupKind::Bundle => {
            let mut archive = ZipArchive::new(
                File::open(in_path).with_context(|| format!("cannot open {}", in_path.display()))?,
            )
            .context("bundle is not a readable zip archive")?;

            let manifest: serde_json::Value = {
                let entry = archive
                    .by_name(MANIFEST_ENTRY)
                    .context("bundle has no manifest.json")?;
                serde_json::from_reader(entry).context("manifest.json is not valid JSON")?
            };
            let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
            if format != BUNDLE_FORMAT_V1 {
                bail!("unsupported bundle format '{}'", format);
            }

            let mut entry = archive
                .by_name(DB_ENTRY)
                .with_context(|| format!("bundle has no {}", DB_ENTRY))?;
            let mut out = File::create(staged)
                .with_context(|| format!("cannot stage into {}", staged.display()))?;
            std::io::copy(&mut entry, &mut out).context("extracting database from bundle")?;
            out.flush()?;
        }
    }
    Ok(())
}

fn verify_database(path: &Path) -> anyhow::Result<()> {
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    File::open(path)?
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)?;
    if head != SQLITE_MAGIC {
        bail!("backup does not contain a SQLite database");
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context("cannot open backup database")?;
    let check: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .context("backup database failed integrity check")?;
    if check != "ok" {
        bail!("backup database failed integrity check: {}", check);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_db(path: &Path, marker: i64) {
        let conn = Connection::open(path).expect("open db");
        conn.execute_batch("CREATE TABLE marker(value INTEGER NOT NULL);")
            .expect("create");
        conn.execute("INSERT INTO marker(value) VALUES(?)", [marker])
            .expect("insert");
    }

    fn read_marker(path: &Path) -> i64 {
        Connection::open(path)
            .expect("open db")
            .query_row("SELECT value FROM marker", [], |r| r.get(0))
            .expect("marker")
    }

    #[test]
    fn bundle_roundtrip_replaces_database() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        let db_src = src.path().join("sessiond.sqlite3");
        write_db(&db_src, 7);

        let bundle = src.path().join("out").join("backup.zip");
        let export = export_workspace_bundle(&db_src, &bundle).expect("export");
        assert_eq!(export.bundle_format, BUNDLE_FORMAT_V1);
        assert_eq!(export.entry_count, 2);

        let db_dst = dst.path().join("sessiond.sqlite3");
        write_db(&db_dst, 1);
        let import = import_workspace_bundle(&bundle, &db_dst).expect("import");
        assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT_V1);
        assert_eq!(read_marker(&db_dst), 7);
        assert!(!staging_path(&db_dst).exists());
    }

    #[test]
    fn raw_sqlite_file_is_accepted() {
        let dir = tempfile::tempdir().expect("dir");
        let raw = dir.path().join("old.sqlite3");
        write_db(&raw, 3);
        let db = dir.path().join("ws").join("sessiond.sqlite3");

        let import = import_workspace_bundle(&raw, &db).expect("import");
        assert_eq!(import.bundle_format_detected, RAW_SQLITE_FORMAT);
        assert_eq!(read_marker(&db), 3);
    }

    #[test]
    fn non_database_file_leaves_workspace_untouched() {
        let dir = tempfile::tempdir().expect("dir");
        let db = dir.path().join("sessiond.sqlite3");
        write_db(&db, 5);
        let before = fs::read(&db).expect("read db");

        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "this is not a database, just some notes").expect("write notes");
        assert!(import_workspace_bundle(&notes, &db).is_err());

        assert_eq!(fs::read(&db).expect("read db"), before);
        assert!(!staging_path(&db).exists());
    }

    #[test]
    fn bundle_with_corrupt_database_is_rejected() {
        let dir = tempfile::tempdir().expect("dir");
        let db = dir.path().join("sessiond.sqlite3");
        write_db(&db, 9);

        let fake = dir.path().join("fake.sqlite3");
        fs::write(&fake, b"not sqlite at all").expect("write fake");
        let bundle = dir.path().join("bad.zip");
        // Exporting only copies bytes, so it happily wraps the bad file.
        export_workspace_bundle(&fake, &bundle).expect("export");

        assert!(import_workspace_bundle(&bundle, &db).is_err());
        assert_eq!(read_marker(&db), 9);
        assert!(!staging_path(&db).exists());
    }

    #[test]
    fn export_requires_existing_database() {
        let dir = tempfile::tempdir().expect("dir");
        let res = export_workspace_bundle(
            &dir.path().join("missing.sqlite3"),
            &dir.path().join("b.zip"),
        );
        assert!(res.is_err());
    }
}
