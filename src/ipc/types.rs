use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::SidecarConfig;
use crate::snapshot::SessionCache;
use crate::sync::SyncWorker;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: SidecarConfig,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cache: SessionCache,
    pub sync_worker: Option<SyncWorker>,
}

impl AppState {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            cache: SessionCache::new(),
            sync_worker: None,
        }
    }

    /// Drops the worker before the connection so nothing holds the file.
    pub fn close_workspace(&mut self) {
        self.sync_worker = None;
        self.db = None;
        self.cache.invalidate();
        self.workspace = None;
    }
}
