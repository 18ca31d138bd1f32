mod activity;
mod aggregate;
mod attendance;
mod backup;
mod config;
mod db;
mod deduction;
mod ipc;
mod model;
mod money;
mod registry;
mod schedule;
mod snapshot;
mod store;
mod sync;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = config::SidecarConfig::from_env();
    log::info!(
        "schoold {} starting (sync worker {})",
        env!("CARGO_PKG_VERSION"),
        if config.sync.worker_enabled { "on" } else { "off" }
    );
    let mut state = ipc::AppState::new(config);

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

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    state.close_workspace();
    log::info!("stdin closed; exiting");
}
