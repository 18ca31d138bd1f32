mod common;

use common::{temp_dir, Sidecar};
use serde_json::{json, Value};

fn student(sc: &mut Sidecar, name: &str, course_id: &str) -> String {
    let res = sc.call(
        "students.create",
        json!({ "student": { "name": name, "assignedCourseId": course_id } }),
    );
    res["student"]["id"].as_str().expect("student id").to_string()
}

fn balance_of(sc: &mut Sidecar, id: &str) -> f64 {
    let res = sc.call("students.list", json!({}));
    res["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["id"] == json!(id))
        .and_then(|s| s["balance"].as_f64())
        .expect("balance")
}

fn auto_fees(sc: &mut Sidecar) -> Vec<Value> {
    let res = sc.call("finance.list", json!({}));
    res["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .filter(|e| e["category"] == json!("automatic deduction"))
        .cloned()
        .collect()
}

#[test]
fn lesson_fee_is_charged_once_per_course_day() {
    let workspace = temp_dir("schoold-deductions");
    let mut sc = Sidecar::open(&workspace);

    let course = sc.call(
        "courses.create",
        json!({ "course": { "title": "English-A1", "days": "DCHJ", "time": "14:00", "price": "300000" } }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();
    let ids: Vec<String> = ["Ali", "Bek", "Sara"]
        .iter()
        .map(|n| student(&mut sc, n, &course_id))
        .collect();

    // Wednesday, half an hour after the lesson started.
    let report = sc.call("deductions.process", json!({ "now": "2026-10-14T14:30:00" }));
    assert_eq!(report["date"], json!("2026-10-14"));
    assert_eq!(report["deducted"], json!(1));
    let row = &report["courses"][0];
    assert_eq!(row["outcome"], json!("deducted"));
    assert_eq!(row["fee"], json!(25000));
    assert_eq!(row["students"], json!(3));

    for id in &ids {
        assert_eq!(balance_of(&mut sc, id), -25000.0);
    }
    let fees = auto_fees(&mut sc);
    assert_eq!(fees.len(), 3);
    assert!(fees.iter().all(|e| e["amount"] == json!("-25000")));
    assert!(fees.iter().all(|e| e["date"] == json!("14.10.2026")));
    assert!(fees
        .iter()
        .all(|e| e["title"] == json!("English-A1 - automatic lesson fee")));

    let again = sc.call("deductions.process", json!({ "now": "2026-10-14T15:00:00" }));
    assert_eq!(again["deducted"], json!(0));
    assert_eq!(again["courses"][0]["outcome"], json!("already_processed"));
    for id in &ids {
        assert_eq!(balance_of(&mut sc, id), -25000.0);
    }
    assert_eq!(auto_fees(&mut sc).len(), 3);

    let activities = sc.call("activities.list", json!({}));
    let charged: Vec<&Value> = activities["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .filter(|a| a["action"] == json!("automatic deduction"))
        .collect();
    assert_eq!(charged.len(), 1);
    assert_eq!(charged[0]["target"], json!("English-A1: 25000 UZS from 3 student(s)"));

    let stats = sc.call("dashboard.stats", json!({}));
    assert_eq!(stats["debtors"], json!(3));
    assert_eq!(stats["expense"].as_f64(), Some(75000.0));
}

#[test]
fn nothing_is_charged_before_start_or_on_off_days() {
    let workspace = temp_dir("schoold-deductions-skip");
    let mut sc = Sidecar::open(&workspace);
    let course = sc.call(
        "courses.create",
        json!({ "course": { "title": "Math", "days": "DCHJ", "time": "14:00-15:30", "price": 120000 } }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();
    let id = student(&mut sc, "Ali", &course_id);

    let early = sc.call("deductions.process", json!({ "now": "2026-10-14T13:59" }));
    assert_eq!(early["courses"][0]["outcome"], json!("not_started"));

    // Tuesday is not a DCHJ day.
    let off = sc.call("deductions.process", json!({ "now": "2026-10-13T16:00" }));
    assert_eq!(off["courses"][0]["outcome"], json!("not_scheduled"));

    assert_eq!(balance_of(&mut sc, &id), 0.0);
    assert!(auto_fees(&mut sc).is_empty());
}
