use crate::deduction::{self, DeductionPolicy};
use crate::ipc::helpers::{parse_now, require_db, respond, snapshot, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::Value;

fn deductions_process(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let now = parse_now(params)?;
    let policy = DeductionPolicy {
        lessons_per_month: state.config.lessons_per_month,
    };
    let snap = snapshot(state)?;
    let conn = require_db(state)?;
    let report = deduction::process_daily_deductions(conn, &snap, now, policy);
    Ok(report.to_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "deductions.process" => Some(respond(&req.id, deductions_process(state, &req.params))),
        _ => None,
    }
}
