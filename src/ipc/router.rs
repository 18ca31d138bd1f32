use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Family = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[Family] = &[
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::catalog::try_handle,
    handlers::courses::try_handle,
    handlers::leads::try_handle,
    handlers::finance::try_handle,
    handlers::attendance::try_handle,
    handlers::deductions::try_handle,
    handlers::dashboard::try_handle,
    handlers::settings::try_handle,
    handlers::sync::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    log::debug!("-> {} ({})", req.method, req.id);
    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
