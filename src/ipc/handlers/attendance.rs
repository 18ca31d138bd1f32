use crate::attendance::{self, Marks};
use crate::ipc::helpers::{get_required_str, parse_date, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceMark, MarkStatus};
use serde_json::{json, Value};

fn parse_marks(params: &Value) -> Result<Marks, HandlerErr> {
    let Some(raw) = params.get("students") else {
        return Ok(Marks::new());
    };
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::bad_params("students must be an object keyed by student id"));
    };
    let mut marks = Marks::new();
    for (student_id, v) in obj {
        let status = v.get("status").and_then(|s| s.as_str()).and_then(MarkStatus::parse);
        if status.is_none() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "status must be Present or Absent".into(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
        let mut mark = AttendanceMark::from_value(v);
        if mark.homework.is_empty() {
            mark.homework = "0".into();
        }
        marks.insert(student_id.clone(), mark);
    }
    Ok(marks)
}

fn attendance_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let course_id = get_required_str(params, "courseId")?;
    let date = parse_date(params, "date")?;
    let preview = attendance::preview_attendance(conn, &course_id, date).map_err(HandlerErr::query)?;
    Ok(preview.to_json())
}

fn attendance_save(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let course_id = get_required_str(params, "courseId")?;
    let date = parse_date(params, "date")?;
    let marks = parse_marks(params)?;
    let saved = attendance::save_or_update_attendance(conn, &course_id, date, &marks)
        .map_err(|e| HandlerErr::store(e, "db_tx_failed"))?;
    if saved.sync_queued {
        if let Some(worker) = state.sync_worker.as_ref() {
            worker.nudge();
        }
    }
    Ok(json!({
        "record": saved.record.to_json(),
        "created": saved.created,
        "syncQueued": saved.sync_queued,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.open" => attendance_open(state, &req.params),
        "attendance.save" => attendance_save(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
