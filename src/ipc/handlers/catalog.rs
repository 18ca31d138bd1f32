//! Plain CRUD families: teachers, subjects and schedule entries.

use crate::ipc::helpers::{docs_json, get_object, get_required_str, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::store::{self, Collection};
use serde_json::{json, Value};

#[derive(Clone, Copy)]
struct Family {
    collection: Collection,
    /// Singular noun for params, results and activity entries.
    noun: &'static str,
    /// Field that must be a non-empty string on create.
    required: &'static str,
    id_param: &'static str,
    updatable: bool,
}

const TEACHERS: Family = Family {
    collection: Collection::Teachers,
    noun: "teacher",
    required: "name",
    id_param: "teacherId",
    updatable: true,
};

const SUBJECTS: Family = Family {
    collection: Collection::Subjects,
    noun: "subject",
    required: "title",
    id_param: "subjectId",
    updatable: true,
};

const SCHEDULE: Family = Family {
    collection: Collection::Schedule,
    noun: "entry",
    required: "date",
    id_param: "entryId",
    updatable: false,
};

fn family_list(state: &AppState, family: Family) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let docs = store::list(conn, family.collection).map_err(HandlerErr::query)?;
    Ok(json!({ "items": docs_json(&docs) }))
}

fn family_create(state: &AppState, family: Family, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let fields = get_object(params, family.noun)?;
    get_required_str(&Value::Object(fields.clone()), family.required)?;
    let doc = registry::create_entity(conn, family.collection, fields, family.noun)
        .map_err(HandlerErr::update)?;
    Ok(json!({ family.noun: doc.to_json() }))
}

fn family_update(state: &AppState, family: Family, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, family.id_param)?;
    let patch = get_object(params, "patch")?;
    let doc = registry::update_entity(conn, family.collection, &id, patch, family.noun)
        .map_err(HandlerErr::update)?;
    Ok(json!({ family.noun: doc.to_json() }))
}

fn family_delete(state: &AppState, family: Family, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, family.id_param)?;
    registry::delete_entity(conn, family.collection, &id, family.noun).map_err(HandlerErr::update)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (prefix, action) = req.method.split_once('.')?;
    let family = match prefix {
        "teachers" => TEACHERS,
        "subjects" => SUBJECTS,
        "schedule" => SCHEDULE,
        _ => return None,
    };
    let result = match action {
        "list" => family_list(state, family),
        "create" => family_create(state, family, &req.params),
        "update" if family.updatable => family_update(state, family, &req.params),
        "delete" => family_delete(state, family, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
