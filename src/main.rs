mod backup;
mod config;
mod db;
mod error;
mod ipc;
mod rollover;
mod versions;

use anyhow::Context;
use std::io::{self, BufRead, Write};

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("SESSIOND_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = config::Config::load().context("failed to load configuration")?;
    init_tracing(&config.logging.level)?;

    let mut state = ipc::AppState::new(config);
    if let Some(path) = state.config.workspace.path.clone() {
        let conn = db::open_db(&path, &state.config.database)
            .with_context(|| format!("failed to open workspace {}", path.display()))?;
        tracing::info!(workspace = %path.display(), "workspace opened from configuration");
        state.workspace = Some(path);
        state.db = Some(conn);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::debug!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };

        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }

    Ok(())
}
