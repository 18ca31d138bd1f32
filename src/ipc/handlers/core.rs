use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sync::SyncWorker;
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "syncWorker": state.sync_worker.is_some(),
        }),
    )
}

/// Opens (creating if needed) the workspace database and starts the sync worker.
pub(crate) fn open_workspace(state: &mut AppState, path: &Path) -> Result<(), HandlerErr> {
    state.close_workspace();
    let conn = db::open_db(path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);

    if state.config.sync.worker_enabled {
        match SyncWorker::spawn(db::db_path(path), state.config.sync.clone()) {
            Ok(worker) => state.sync_worker = Some(worker),
            // Queued payloads still go out through sync.flush.
            Err(e) => log::warn!("sync worker not started: {:#}", e),
        }
    }
    log::info!("workspace opened at {}", path.display());
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = get_required_str(&req.params, "path").and_then(|raw| {
        let path = PathBuf::from(raw);
        open_workspace(state, &path)?;
        Ok(json!({ "workspacePath": path.to_string_lossy() }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
