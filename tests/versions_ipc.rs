mod common;

use common::spawn_sidecar;
use serde_json::json;

#[test]
fn cleanup_then_restore_recreates_levels_and_semesters() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());

    let p = sc.create_program("Economics");
    sc.set_level(p, 1, 40, Some(0.5));
    sc.set_level(p, 2, 10, None);
    let created = sc.request_ok("sessions.create", json!({}));
    let session_id = created.get("session_id").and_then(|v| v.as_i64()).expect("session_id");

    let levels_before = sc.request_ok("levels.list", json!({}));
    let semesters_before = sc.request_ok("semesters.list", json!({ "session_id": session_id }));

    let cleanup = sc.request_ok("versions.cleanup", json!({ "description": "Year end" }));
    let version_id = cleanup.get("version_id").and_then(|v| v.as_i64()).expect("version_id");

    let _ = sc.request_ok("semesters.toggle", json!({}));
    let _ = sc.request_ok("semesters.toggle", json!({}));
    sc.set_level(p, 1, 3, None);
    assert_ne!(sc.request_ok("levels.list", json!({})), levels_before);

    let restored = sc.request_ok("versions.restore", json!({ "version_id": version_id }));
    assert_eq!(
        restored.get("message").and_then(|v| v.as_str()),
        Some(format!("Restored to version {}", version_id).as_str())
    );
    assert_eq!(sc.request_ok("levels.list", json!({})), levels_before);
    assert_eq!(
        sc.request_ok("semesters.list", json!({ "session_id": session_id })),
        semesters_before
    );

    let versions = sc.request_ok("versions.list", json!({}));
    let list = versions.as_array().expect("versions");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].get("description").and_then(|v| v.as_str()), Some("Year end"));
}

#[test]
fn restore_rejects_invalid_and_unknown_versions() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());

    let p = sc.create_program("Geography");
    sc.set_level(p, 1, 8, None);
    let before = sc.request_ok("levels.list", json!({}));

    assert_eq!(sc.request_err("versions.restore", json!({ "version_id": 0 })), "bad_params");
    assert_eq!(sc.request_err("versions.restore", json!({})), "bad_params");
    assert_eq!(sc.request_err("versions.restore", json!({ "version_id": 7 })), "not_found");
    assert_eq!(sc.request_ok("levels.list", json!({})), before);
}

#[test]
fn cleanup_without_description_uses_default() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());

    let _ = sc.request_ok("versions.cleanup", json!({}));
    let versions = sc.request_ok("versions.list", json!({}));
    assert_eq!(
        versions[0].get("description").and_then(|v| v.as_str()),
        Some("Automated cleanup")
    );
}
