use crate::aggregate;
use crate::ipc::helpers::{
    get_object, get_optional_usize, get_required_str, parse_now, require_db, respond, snapshot,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, BalanceAdjustment};
use crate::store::{self, Collection};
use serde_json::{json, Value};

fn students_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let snap = snapshot(state)?;
    let conn = require_db(state)?;
    let docs = store::list(conn, Collection::Students).map_err(HandlerErr::query)?;
    let students: Vec<Value> = docs
        .iter()
        .map(|doc| {
            let mut row = doc.to_json();
            if let Some(rate) = aggregate::attendance_rate(&snap, &doc.id) {
                row["attendanceRate"] = json!(rate);
            }
            row
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn students_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut fields = get_object(params, "student")?;
    let name = get_required_str(&Value::Object(fields.clone()), "name")?;
    fields.insert("name".into(), json!(name));
    let doc = registry::create_student(conn, fields).map_err(HandlerErr::update)?;
    Ok(json!({ "student": doc.to_json() }))
}

fn students_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "studentId")?;
    let patch = get_object(params, "patch")?;
    if patch.contains_key("balance") {
        return Err(HandlerErr::bad_params(
            "balance changes go through students.adjustBalance",
        ));
    }
    let doc = registry::update_student(conn, &id, patch).map_err(HandlerErr::update)?;
    Ok(json!({ "student": doc.to_json() }))
}

fn students_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "studentId")?;
    registry::delete_entity(conn, Collection::Students, &id, "student").map_err(HandlerErr::update)?;
    Ok(json!({ "ok": true }))
}

fn students_adjust_balance(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "studentId")?;
    let kind = get_required_str(params, "kind")?;
    let Some(kind) = BalanceAdjustment::parse(&kind) else {
        return Err(HandlerErr::bad_params("kind must be deposit or withdrawal"));
    };
    let amount = params
        .get("amount")
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|a: &f64| a.is_finite() && *a > 0.0)
        .ok_or_else(|| HandlerErr::bad_params("amount must be a positive number"))?;
    let today = parse_now(params)?.date();
    let out = registry::adjust_balance(conn, &id, kind, amount, today).map_err(HandlerErr::update)?;
    Ok(json!({ "balance": out.balance, "entryId": out.entry_id }))
}

fn students_attendance_history(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let snap = snapshot(state)?;
    let rows: Vec<Value> = aggregate::student_attendance_history(&snap, &id)
        .iter()
        .map(|r| r.to_json())
        .collect();
    Ok(json!({
        "history": rows,
        "attendanceRate": aggregate::attendance_rate(&snap, &id),
    }))
}

fn students_finance_history(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let limit = get_optional_usize(params, "limit")?;
    let snap = snapshot(state)?;
    let ids: Vec<&str> = aggregate::student_finance_history(&snap, &id, limit)
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    let conn = require_db(state)?;
    let mut entries = Vec::with_capacity(ids.len());
    for entry_id in ids {
        if let Some(doc) = store::get(conn, Collection::Finance, entry_id).map_err(HandlerErr::query)? {
            entries.push(doc.to_json());
        }
    }
    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        "students.adjustBalance" => students_adjust_balance(state, &req.params),
        "students.attendanceHistory" => students_attendance_history(state, &req.params),
        "students.financeHistory" => students_finance_history(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
