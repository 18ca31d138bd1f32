use crate::activity;
use crate::ipc::helpers::{
    get_object, get_optional_usize, get_required_str, parse_now, require_db, respond, snapshot,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::EntryKind;
use crate::money::MoneyField;
use crate::registry;
use crate::store::{self, Collection};
use serde_json::{json, Value};

fn finance_list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let limit = get_optional_usize(params, "limit")?;
    let conn = require_db(state)?;
    let mut docs = store::list(conn, Collection::Finance).map_err(HandlerErr::query)?;
    docs.reverse();
    if let Some(limit) = limit {
        docs.truncate(limit);
    }
    let entries: Vec<Value> = docs.iter().map(|d| d.to_json()).collect();
    Ok(json!({ "entries": entries }))
}

fn finance_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let today = parse_now(params)?.date();
    let conn = require_db(state)?;
    let mut fields = get_object(params, "entry")?;
    let shape = Value::Object(fields.clone());
    get_required_str(&shape, "title")?;
    let kind = EntryKind::parse(&get_required_str(&shape, "type")?);
    if matches!(kind, EntryKind::Other(_)) {
        return Err(HandlerErr::bad_params("type must be Income or Expense"));
    }
    if MoneyField::amount(fields.get("amount")).value().is_none() {
        return Err(HandlerErr::bad_params("amount must be a number"));
    }
    fields.insert("type".into(), json!(kind.as_str()));
    let doc = registry::create_finance_entry(conn, fields, today).map_err(HandlerErr::update)?;
    Ok(json!({ "entry": doc.to_json() }))
}

fn finance_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "entryId")?;
    registry::delete_entity(conn, Collection::Finance, &id, "finance entry").map_err(HandlerErr::update)?;
    Ok(json!({ "ok": true }))
}

fn activities_list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let limit = get_optional_usize(params, "limit")?;
    let snap = snapshot(state)?;
    let rows: Vec<Value> = activity::recent(&snap, limit)
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "name": a.name,
                "action": a.action,
                "target": a.target,
                "time": a.time,
                "createdAt": a.created_at,
            })
        })
        .collect();
    Ok(json!({ "activities": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "finance.list" => finance_list(state, &req.params),
        "finance.create" => finance_create(state, &req.params),
        "finance.delete" => finance_delete(state, &req.params),
        "activities.list" => activities_list(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
