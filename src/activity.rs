use crate::model::Activity;
use crate::snapshot::Snapshot;
use crate::store::{self, server_timestamp, Batch, Collection, Fields};
use rusqlite::Connection;
use serde_json::json;

const ACTOR: &str = "Admin";

fn entry(action: &str, target: &str) -> Fields {
    store::fields(json!({
        "name": ACTOR,
        "action": action,
        "target": target,
        "time": chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
        "createdAt": server_timestamp(),
    }))
}

/// Queues an audit entry inside a larger batch.
pub fn push(batch: &mut Batch, action: &str, target: &str) {
    batch.create(Collection::Activities, entry(action, target));
}

/// Appends an audit entry on its own. Failures are logged and swallowed.
pub fn record(conn: &Connection, action: &str, target: &str) {
    if let Err(e) = store::create(conn, Collection::Activities, entry(action, target)) {
        log::warn!("activity '{}' not recorded: {}", action, e);
    }
}

/// Newest first.
pub fn recent(snapshot: &Snapshot, limit: Option<usize>) -> Vec<&Activity> {
    let mut out: Vec<&Activity> = snapshot.activities.iter().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}
