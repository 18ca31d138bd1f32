use crate::backup;
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{get_required_str, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn export_workspace(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let conn = require_db(state)?;
    let Some(workspace) = state.workspace.clone() else {
        return Err(HandlerErr::no_workspace());
    };
    let out = PathBuf::from(&out_path);
    let export = backup::export_workspace_bundle(conn, &workspace, &out).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": out_path })),
    })?;
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn import_workspace(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let workspace = params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(HandlerErr::no_workspace)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr {
            code: "not_found",
            message: "bundle file not found".into(),
            details: Some(json!({ "path": in_path })),
        });
    }

    // The worker and the IPC connection both hold the file open.
    state.close_workspace();
    let import = backup::import_workspace_bundle(&src, &workspace).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": in_path })),
    });
    // Reopen even when the import failed so the previous database stays usable.
    open_workspace(state, &workspace)?;
    let import = import?;
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormat": import.bundle_format,
        "dbSha256": import.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspace" => export_workspace(state, &req.params),
        "backup.importWorkspace" => import_workspace(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
