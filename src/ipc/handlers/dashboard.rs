use crate::aggregate;
use crate::ipc::helpers::{parse_now, respond, snapshot, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn dashboard_stats(state: &mut AppState) -> Result<Value, HandlerErr> {
    let snap = snapshot(state)?;
    Ok(aggregate::dashboard_stats(&snap).to_json())
}

fn dashboard_courses(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let now = parse_now(params)?;
    let snap = snapshot(state)?;
    let overview = aggregate::course_overview(&snap, now);
    let courses: Vec<Value> = overview.iter().map(|o| o.to_json()).collect();
    let in_session = overview.iter().filter(|o| o.in_session_now).count();
    Ok(json!({ "courses": courses, "inSessionNow": in_session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => dashboard_stats(state),
        "dashboard.courses" => dashboard_courses(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
