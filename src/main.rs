mod aggregate;
mod attendance;
mod calc;
mod classify;
mod error;
mod ingest;
mod ipc;
mod model;
mod snapshot;

use anyhow::Context;
use std::io::{self, BufRead, Write};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let mut state = ipc::AppState::default();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradeboardd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // Can't reply with an id we never parsed.
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };

        writeln!(stdout, "{}", resp).context("write response")?;
        stdout.flush().context("flush response")?;
    }

    Ok(())
}
