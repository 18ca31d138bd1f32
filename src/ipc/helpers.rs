use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::snapshot::Snapshot;
use crate::store::{Fields, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::rc::Rc;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    /// Typed store failures keep their meaning; anything else gets `fallback`.
    pub fn store(e: StoreError, fallback: &'static str) -> Self {
        match &e {
            StoreError::NotFound { collection, id } => Self {
                code: "not_found",
                message: e.to_string(),
                details: Some(json!({ "collection": collection, "id": id })),
            },
            StoreError::AlreadyExists { collection, id } => Self {
                code: "conflict",
                message: e.to_string(),
                details: Some(json!({ "collection": collection, "id": id })),
            },
            StoreError::Conflict { collection, .. } => Self {
                code: "conflict",
                message: e.to_string(),
                details: Some(json!({ "collection": collection })),
            },
            StoreError::BadField(_) => Self::bad_params(e.to_string()),
            StoreError::Sqlite(_) | StoreError::Json(_) => Self::new(fallback, e.to_string()),
        }
    }

    pub fn query(e: StoreError) -> Self {
        Self::store(e, "db_query_failed")
    }

    pub fn update(e: StoreError) -> Self {
        Self::store(e, "db_update_failed")
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(HandlerErr::no_workspace)
}

/// Current snapshot of the open workspace, reloaded if stale.
pub fn snapshot(state: &mut AppState) -> Result<Rc<Snapshot>, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    state.cache.snapshot(conn).map_err(HandlerErr::query)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_usize(params: &Value, key: &str) -> Result<Option<usize>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

pub fn get_object(params: &Value, key: &str) -> Result<Fields, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

/// `params.now` as a local wall-clock time; defaults to the machine clock.
pub fn parse_now(params: &Value) -> Result<NaiveDateTime, HandlerErr> {
    match params.get("now").and_then(|v| v.as_str()) {
        None => Ok(chrono::Local::now().naive_local()),
        Some(raw) => {
            let raw = raw.trim();
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
                .map_err(|_| HandlerErr::bad_params("now must look like YYYY-MM-DDTHH:MM[:SS]"))
        }
    }
}

/// `params[key]` as an ISO date, or today's date from `params.now`.
pub fn parse_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
        None => Ok(parse_now(params)?.date()),
    }
}

/// Documents with `id` folded in, the list shape every `*.list` returns.
pub fn docs_json<'a>(docs: impl IntoIterator<Item = &'a crate::store::Document>) -> Vec<Value> {
    docs.into_iter().map(|d| d.to_json()).collect()
}
