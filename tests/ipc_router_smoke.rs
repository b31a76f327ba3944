mod common;

use common::spawn_sidecar;
use serde_json::json;

#[test]
fn router_answers_every_method_family() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sc = spawn_sidecar();

    let health = sc.request_ok("health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspace_path").map(|v| v.is_null()).unwrap_or(false));

    assert_eq!(sc.request_err("sessions.list", json!({})), "no_workspace");
    assert_eq!(sc.request_err("workspace.select", json!({})), "bad_params");
    sc.select_workspace(workspace.path());

    for method in ["sessions.list", "programs.list", "levels.list", "versions.list"] {
        let data = sc.request_ok(method, json!({}));
        assert!(data.is_array(), "{} should return a list", method);
    }

    assert_eq!(sc.request_err("nope.method", json!({})), "not_implemented");
}

#[test]
fn malformed_lines_get_bad_json_and_loop_continues() {
    let mut sc = spawn_sidecar();
    let resp = sc.send_line("{not json");
    assert_eq!(resp.get("status").and_then(|v| v.as_str()), Some("error"));
    assert_eq!(resp.get("code").and_then(|v| v.as_str()), Some("bad_json"));
    assert!(resp.get("id").map(|v| v.is_null()).unwrap_or(false));

    let _ = sc.request_ok("health", json!({}));
}

#[test]
fn switch_context_validates_without_storage() {
    let mut sc = spawn_sidecar();

    let ctx = sc.request_ok(
        "context.switch",
        json!({ "session_id": 3, "semester_number": 2 }),
    );
    assert_eq!(ctx, json!({ "active_session": 3, "active_semester": 2 }));

    assert_eq!(
        sc.request_err("context.switch", json!({ "session_id": 3, "semester_number": 3 })),
        "bad_params"
    );
    assert_eq!(
        sc.request_err("context.switch", json!({ "session_id": 0, "semester_number": 1 })),
        "bad_params"
    );
    assert_eq!(
        sc.request_err("context.switch", json!({ "semester_number": 1 })),
        "bad_params"
    );
}

#[test]
fn backup_export_and_import_restore_workspace() {
    let workspace = tempfile::tempdir().expect("workspace");
    let out = tempfile::tempdir().expect("out");
    let bundle = out.path().join("sessions-backup.zip");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());

    let p = sc.create_program("Pharmacy");
    sc.set_level(p, 1, 21, None);
    let export = sc.request_ok(
        "workspace.exportBackup",
        json!({ "out_path": bundle.to_string_lossy() }),
    );
    assert_eq!(export.get("entry_count").and_then(|v| v.as_i64()), Some(2));

    sc.set_level(p, 1, 2, None);
    assert_eq!(sc.level_count(p, 1), Some(2));

    let import = sc.request_ok(
        "workspace.importBackup",
        json!({ "in_path": bundle.to_string_lossy() }),
    );
    assert_eq!(
        import.get("bundle_format_detected").and_then(|v| v.as_str()),
        Some("sessiond-workspace-v1")
    );
    assert_eq!(sc.level_count(p, 1), Some(21));

    assert_eq!(
        sc.request_err(
            "workspace.importBackup",
            json!({ "in_path": out.path().join("missing.zip").to_string_lossy() })
        ),
        "not_found"
    );
}

#[test]
fn importing_non_database_file_keeps_workspace() {
    let workspace = tempfile::tempdir().expect("workspace");
    let scratch = tempfile::tempdir().expect("scratch");
    let notes = scratch.path().join("notes.txt");
    std::fs::write(&notes, "this is not a database, just some notes").expect("write notes");

    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let p = sc.create_program("Nursing");
    sc.set_level(p, 1, 17, None);

    assert_eq!(
        sc.request_err(
            "workspace.importBackup",
            json!({ "in_path": notes.to_string_lossy() })
        ),
        "backup_failed"
    );

    assert_eq!(sc.level_count(p, 1), Some(17));
    let db = std::fs::read(workspace.path().join("sessiond.sqlite3")).expect("read db");
    assert!(db.starts_with(b"SQLite format 3\0"));
}
