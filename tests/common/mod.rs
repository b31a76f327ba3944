#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct Sidecar {
    pub child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_sessiond");
    let mut child = Command::new(exe)
        .env_remove("SESSIOND_WORKSPACE__PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sessiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("status").and_then(|v| v.as_str()),
            Some("success"),
            "{} failed: {}",
            method,
            value
        );
        value.get("data").cloned().unwrap_or_else(|| json!(null))
    }

    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("status").and_then(|v| v.as_str()),
            Some("error"),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        assert!(value.get("message").and_then(|v| v.as_str()).is_some());
        value
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn select_workspace(&mut self, path: &std::path::Path) {
        let _ = self.request_ok(
            "workspace.select",
            json!({ "path": path.to_string_lossy() }),
        );
    }

    pub fn create_program(&mut self, name: &str) -> i64 {
        self.request_ok("programs.create", json!({ "name": name }))
            .get("program_id")
            .and_then(|v| v.as_i64())
            .expect("program_id")
    }

    pub fn set_level(&mut self, program_id: i64, level: i64, count: i64, rate: Option<f64>) {
        let mut params = json!({
            "program_id": program_id,
            "level": level,
            "students_count": count,
        });
        if let Some(r) = rate {
            params["promotion_rate"] = json!(r);
        }
        let _ = self.request_ok("levels.set", params);
    }

    pub fn level_count(&mut self, program_id: i64, level: i64) -> Option<i64> {
        let levels = self.request_ok("levels.list", json!({ "program_id": program_id }));
        levels
            .as_array()
            .expect("levels array")
            .iter()
            .find(|l| l.get("level").and_then(|v| v.as_i64()) == Some(level))
            .and_then(|l| l.get("students_count").and_then(|v| v.as_i64()))
    }
}
