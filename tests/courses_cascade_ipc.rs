mod common;

use common::{temp_dir, Sidecar};
use serde_json::{json, Value};

fn find<'a>(rows: &'a Value, id: &str) -> &'a Value {
    rows.as_array()
        .expect("rows")
        .iter()
        .find(|r| r["id"] == json!(id))
        .expect("row present")
}

#[test]
fn rename_and_delete_cascade_to_students() {
    let workspace = temp_dir("schoold-courses");
    let mut sc = Sidecar::open(&workspace);

    let course_id = sc.call("courses.create", json!({ "course": { "title": "English-A1" } }))["course"]["id"]
        .as_str()
        .expect("course id")
        .to_string();
    let other_id = sc.call("courses.create", json!({ "course": { "title": "Math" } }))["course"]["id"]
        .as_str()
        .expect("course id")
        .to_string();
    let ali = sc.call(
        "students.create",
        json!({ "student": { "name": "Ali", "assignedCourseId": course_id } }),
    )["student"]
        .clone();
    assert_eq!(ali["course"], json!("English-A1"));
    assert_eq!(ali["status"], json!("Active"));
    let ali_id = ali["id"].as_str().expect("id").to_string();
    let bek_id = sc.call(
        "students.create",
        json!({ "student": { "name": "Bek", "assignedCourseId": other_id } }),
    )["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    sc.call(
        "courses.update",
        json!({ "courseId": course_id, "patch": { "title": "English-A2" } }),
    );
    let students = sc.call("students.list", json!({}))["students"].clone();
    assert_eq!(find(&students, &ali_id)["course"], json!("English-A2"));
    assert_eq!(find(&students, &bek_id)["course"], json!("Math"));

    let code = sc.call_err(
        "courses.update",
        json!({ "courseId": course_id, "patch": { "title": "  " } }),
    );
    assert_eq!(code, "bad_params");

    let deleted = sc.call("courses.delete", json!({ "courseId": course_id }));
    assert_eq!(deleted["unassignedStudents"], json!(1));
    let students = sc.call("students.list", json!({}))["students"].clone();
    let ali = find(&students, &ali_id);
    assert_eq!(ali["course"], json!("Not Assigned"));
    assert_eq!(ali["status"], json!("Pending"));
    assert_eq!(ali["assignedCourseId"], Value::Null);
    assert_eq!(find(&students, &bek_id)["course"], json!("Math"));

    let courses = sc.call("courses.list", json!({}))["courses"].clone();
    assert_eq!(courses.as_array().map(|c| c.len()), Some(1));

    let code = sc.call_err("courses.delete", json!({ "courseId": course_id }));
    assert_eq!(code, "not_found");
}

#[test]
fn balance_adjustments_write_the_ledger() {
    let workspace = temp_dir("schoold-balance");
    let mut sc = Sidecar::open(&workspace);
    let id = sc.call("students.create", json!({ "student": { "name": "Ali" } }))["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let dep = sc.call(
        "students.adjustBalance",
        json!({ "studentId": id, "kind": "deposit", "amount": 200000, "now": "2026-10-14T09:00" }),
    );
    assert_eq!(dep["balance"].as_f64(), Some(200000.0));
    let wd = sc.call(
        "students.adjustBalance",
        json!({ "studentId": id, "kind": "withdrawal", "amount": "50000", "now": "2026-10-14T09:05" }),
    );
    assert_eq!(wd["balance"].as_f64(), Some(150000.0));

    let code = sc.call_err(
        "students.adjustBalance",
        json!({ "studentId": id, "kind": "deposit", "amount": -5 }),
    );
    assert_eq!(code, "bad_params");
    let code = sc.call_err(
        "students.update",
        json!({ "studentId": id, "patch": { "balance": 1 } }),
    );
    assert_eq!(code, "bad_params");

    let history = sc.call("students.financeHistory", json!({ "studentId": id }));
    let entries = history["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["date"] == json!("14.10.2026")));
}
