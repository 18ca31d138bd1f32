use crate::ipc::helpers::{require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sync::{self, HttpTransport, RetryPolicy};
use serde_json::{json, Value};

fn sync_status(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let status = sync::outbox_status(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "pending": status.pending,
        "sent": status.sent,
        "dead": status.dead,
        "lastError": status.last_error,
        "workerRunning": state.sync_worker.is_some(),
    }))
}

/// Sends everything due right now on the calling thread.
fn sync_flush(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let transport = HttpTransport::new(state.config.sync.request_timeout)
        .map_err(|e| HandlerErr::new("sync_unavailable", format!("{e:#}")))?;
    let policy = RetryPolicy::from(&state.config.sync);
    let now = chrono::Utc::now().timestamp_millis();
    let summary = sync::flush_due(conn, &transport, policy, now)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({
        "sent": summary.sent,
        "failed": summary.failed,
        "dead": summary.dead,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sync.status" => sync_status(state),
        "sync.flush" => sync_flush(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
