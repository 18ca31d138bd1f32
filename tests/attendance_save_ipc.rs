mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn saving_twice_edits_the_same_record() {
    let workspace = temp_dir("schoold-attendance");
    let mut sc = Sidecar::open(&workspace);

    let course = sc.call(
        "courses.create",
        json!({ "course": { "title": "Physics", "days": "Mon, Wed", "time": "10:00" } }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();
    let ali = sc.call(
        "students.create",
        json!({ "student": { "name": "Ali", "assignedCourseId": course_id } }),
    )["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let bek = sc.call(
        "students.create",
        json!({ "student": { "name": "Bek", "assignedCourseId": course_id } }),
    )["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let preview = sc.call(
        "attendance.open",
        json!({ "courseId": course_id, "date": "2026-10-12" }),
    );
    assert_eq!(preview["isEditing"], json!(false));
    assert_eq!(preview["roster"].as_array().map(|r| r.len()), Some(2));

    let first = sc.call(
        "attendance.save",
        json!({
            "courseId": course_id,
            "date": "2026-10-12",
            "students": {
                ali.clone(): { "status": "Present", "homework": "1" },
                bek.clone(): { "status": "Absent", "reason": "sick" },
            }
        }),
    );
    assert_eq!(first["created"], json!(true));
    assert_eq!(first["syncQueued"], json!(false));
    let record_id = first["record"]["id"].as_str().expect("record id").to_string();
    assert_eq!(first["record"]["date"], json!("2026-10-12"));
    assert_eq!(first["record"]["students"][&bek]["reason"], json!("sick"));

    let second = sc.call(
        "attendance.save",
        json!({
            "courseId": course_id,
            "date": "2026-10-12",
            "students": {
                ali.clone(): { "status": "Present", "homework": "1" },
                bek.clone(): { "status": "Present" },
            }
        }),
    );
    assert_eq!(second["created"], json!(false));
    assert_eq!(second["record"]["id"], json!(record_id));
    assert_eq!(second["record"]["students"][&bek]["status"], json!("Present"));

    let reopened = sc.call(
        "attendance.open",
        json!({ "courseId": course_id, "date": "2026-10-12" }),
    );
    assert_eq!(reopened["isEditing"], json!(true));
    assert_eq!(reopened["recordId"], json!(record_id));

    let history = sc.call("students.attendanceHistory", json!({ "studentId": bek }));
    assert_eq!(history["history"].as_array().map(|h| h.len()), Some(1));
    assert_eq!(history["attendanceRate"].as_f64(), Some(100.0));
}

#[test]
fn bad_marks_are_rejected() {
    let workspace = temp_dir("schoold-attendance-bad");
    let mut sc = Sidecar::open(&workspace);
    let course = sc.call("courses.create", json!({ "course": { "title": "Art" } }));
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();

    let code = sc.call_err(
        "attendance.save",
        json!({ "courseId": course_id, "date": "2026-10-12", "students": { "x": { "status": "Late" } } }),
    );
    assert_eq!(code, "bad_params");

    let code = sc.call_err(
        "attendance.save",
        json!({ "courseId": course_id, "date": "12.10.2026", "students": {} }),
    );
    assert_eq!(code, "bad_params");

    let code = sc.call_err(
        "attendance.open",
        json!({ "courseId": "missing", "date": "2026-10-12" }),
    );
    assert_eq!(code, "not_found");
}
