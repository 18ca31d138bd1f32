use crate::aggregate;
use crate::ipc::helpers::{get_object, get_required_str, parse_now, require_db, respond, snapshot, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::store::{self, Collection};
use serde_json::{json, Value};

fn courses_list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let now = parse_now(params)?;
    let snap = snapshot(state)?;
    let conn = require_db(state)?;
    let docs = store::list(conn, Collection::Courses).map_err(HandlerErr::query)?;
    let overview = aggregate::course_overview(&snap, now);
    let courses: Vec<Value> = docs
        .iter()
        .map(|doc| {
            let mut row = doc.to_json();
            if let Some(o) = overview.iter().find(|o| o.course.id == doc.id) {
                row["derivedStatus"] = json!(o.status.as_str());
                row["enrolled"] = json!(o.enrolled);
                row["lessonToday"] = json!(o.lesson_today);
                row["inSessionNow"] = json!(o.in_session_now);
            }
            row
        })
        .collect();
    Ok(json!({ "courses": courses }))
}

fn courses_create(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let fields = get_object(params, "course")?;
    get_required_str(&Value::Object(fields.clone()), "title")?;
    let doc = registry::create_course(conn, fields).map_err(HandlerErr::update)?;
    Ok(json!({ "course": doc.to_json() }))
}

fn courses_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "courseId")?;
    let patch = get_object(params, "patch")?;
    if let Some(title) = patch.get("title") {
        if title.as_str().map(|t| t.trim().is_empty()).unwrap_or(true) {
            return Err(HandlerErr::bad_params("title must be a non-empty string"));
        }
    }
    let doc = registry::update_course(conn, &id, patch).map_err(HandlerErr::update)?;
    Ok(json!({ "course": doc.to_json() }))
}

fn courses_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "courseId")?;
    let unassigned = registry::delete_course(conn, &id).map_err(HandlerErr::update)?;
    Ok(json!({ "ok": true, "unassignedStudents": unassigned }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "courses.list" => courses_list(state, &req.params),
        "courses.create" => courses_create(state, &req.params),
        "courses.update" => courses_update(state, &req.params),
        "courses.delete" => courses_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
