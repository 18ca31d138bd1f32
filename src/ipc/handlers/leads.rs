use crate::ipc::helpers::{docs_json, get_object, get_required_str, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::LeadStatus;
use crate::registry;
use crate::store::{self, Collection};
use serde_json::{json, Value};

fn leads_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let docs = store::list(conn, Collection::Leads).map_err(HandlerErr::query)?;
    Ok(json!({ "leads": docs_json(&docs) }))
}

fn leads_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let fields = get_object(params, "lead")?;
    get_required_str(&Value::Object(fields.clone()), "name")?;
    let doc = registry::create_lead(conn, fields).map_err(HandlerErr::update)?;
    Ok(json!({ "lead": doc.to_json() }))
}

fn leads_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "leadId")?;
    let mut patch = get_object(params, "patch")?;
    if let Some(raw) = patch.get("status") {
        let status = raw
            .as_str()
            .and_then(LeadStatus::parse)
            .ok_or_else(|| HandlerErr::bad_params("status must be one of: New, Contacted, Interested, Registered, Lost"))?;
        patch.insert("status".into(), json!(status.as_str()));
    }
    let doc = registry::update_lead(conn, &id, patch).map_err(HandlerErr::update)?;
    Ok(json!({ "lead": doc.to_json() }))
}

fn leads_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "leadId")?;
    registry::delete_entity(conn, Collection::Leads, &id, "lead").map_err(HandlerErr::update)?;
    Ok(json!({ "ok": true }))
}

fn leads_convert(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "leadId")?;
    let out = registry::convert_lead(conn, &id).map_err(HandlerErr::update)?;
    Ok(json!({
        "lead": out.lead.to_json(),
        "student": out.student.to_json(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "leads.list" => leads_list(state),
        "leads.create" => leads_create(state, &req.params),
        "leads.update" => leads_update(state, &req.params),
        "leads.delete" => leads_delete(state, &req.params),
        "leads.convert" => leads_convert(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
