//! Entity CRUD and the cascades that keep denormalized fields honest.
//!
//! Every multi-document change (course rename, course delete, balance
//! adjustment, lead conversion) is one [`Batch`] committed inside an IMMEDIATE
//! transaction, so readers never see half of it.

use crate::activity;
use crate::model::{Course, Lead, LeadStatus, Student, UNASSIGNED_COURSE};
use crate::money::format_ledger_amount;
use crate::store::{self, server_timestamp, Batch, Collection, Document, Fields, StoreError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Keys callers may never write directly.
const ALWAYS_PROTECTED: [&str; 2] = ["id", "createdAt"];
const STUDENT_PROTECTED: [&str; 2] = ["balance", "course"];
const LEAD_PROTECTED: [&str; 1] = ["convertedStudentId"];

pub const TUITION_CATEGORY: &str = "Tuition";

fn sanitize(mut fields: Fields, protected: &[&str]) -> Fields {
    for key in ALWAYS_PROTECTED.iter().chain(protected) {
        fields.remove(*key);
    }
    fields
}

fn not_found(collection: Collection, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.name(),
        id: id.to_string(),
    }
}

fn require(conn: &Connection, collection: Collection, id: &str) -> Result<Document, StoreError> {
    store::get(conn, collection, id)?.ok_or_else(|| not_found(collection, id))
}

/// Ledger dates are stored day-first.
pub fn ledger_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

fn label(fields: &Fields, key: &str) -> String {
    fields
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// `name` for people, `title` for everything else.
fn display_name(fields: &Fields) -> String {
    let name = label(fields, "name");
    if name.is_empty() {
        label(fields, "title")
    } else {
        name
    }
}

/// Generic create with an activity entry; returns the stored document.
pub fn create_entity(
    conn: &Connection,
    collection: Collection,
    fields: Fields,
    what: &str,
) -> Result<Document, StoreError> {
    let mut fields = sanitize(fields, &[]);
    fields.insert("createdAt".into(), server_timestamp());
    let target = display_name(&fields);
    let id = store::create(conn, collection, fields)?;
    activity::record(conn, &format!("added {}", what), &target);
    require(conn, collection, &id)
}

/// Top-level merge into an existing document.
pub fn update_entity(
    conn: &Connection,
    collection: Collection,
    id: &str,
    patch: Fields,
    what: &str,
) -> Result<Document, StoreError> {
    let patch = sanitize(patch, &[]);
    store::update(conn, collection, id, patch)?;
    let doc = require(conn, collection, id)?;
    activity::record(conn, &format!("updated {}", what), &display_name(&doc.fields));
    Ok(doc)
}

pub fn delete_entity(conn: &Connection, collection: Collection, id: &str, what: &str) -> Result<(), StoreError> {
    let tx = store::begin(conn)?;
    let doc = require(&tx, collection, id)?;
    let mut batch = Batch::new();
    batch.delete(collection, id);
    batch.apply(&tx)?;
    tx.commit()?;
    activity::record(conn, &format!("deleted {}", what), &display_name(&doc.fields));
    Ok(())
}

fn assignment_fields(conn: &Connection, course_id: Option<&str>) -> Result<Fields, StoreError> {
    match course_id {
        Some(cid) => {
            let course = Course::from_document(&require(conn, Collection::Courses, cid)?);
            Ok(store::fields(json!({
                "assignedCourseId": course.id,
                "course": course.title,
                "status": "Active",
            })))
        }
        None => Ok(store::fields(json!({
            "assignedCourseId": null,
            "course": UNASSIGNED_COURSE,
            "status": "Waiting",
        }))),
    }
}

fn requested_course(fields: &Fields) -> Option<Option<String>> {
    match fields.get("assignedCourseId")? {
        Value::String(s) if !s.trim().is_empty() => Some(Some(s.trim().to_string())),
        _ => Some(None),
    }
}

/// New student with a zero balance. An assigned course sets the title and
/// makes the student Active; otherwise they wait unassigned.
pub fn create_student(conn: &Connection, fields: Fields) -> Result<Document, StoreError> {
    let mut fields = sanitize(fields, &STUDENT_PROTECTED);
    let tx = store::begin(conn)?;
    let course_id = requested_course(&fields).flatten();
    let explicit_status = fields.remove("status");
    fields.extend(assignment_fields(&tx, course_id.as_deref())?);
    if let Some(status) = explicit_status {
        fields.insert("status".into(), status);
    }
    fields.insert("balance".into(), json!(0));
    fields.insert("createdAt".into(), server_timestamp());
    let name = label(&fields, "name");

    let mut batch = Batch::new();
    let id = batch.create(Collection::Students, fields);
    batch.apply(&tx)?;
    let doc = require(&tx, Collection::Students, &id)?;
    tx.commit()?;
    activity::record(conn, "added student", &name);
    Ok(doc)
}

/// Balance is not writable here; a changed assignment re-resolves the course title.
pub fn update_student(conn: &Connection, id: &str, patch: Fields) -> Result<Document, StoreError> {
    let mut patch = sanitize(patch, &STUDENT_PROTECTED);
    let tx = store::begin(conn)?;
    let current = Student::from_document(&require(&tx, Collection::Students, id)?);
    if let Some(course_id) = requested_course(&patch) {
        if course_id != current.assigned_course_id {
            let explicit_status = patch.remove("status");
            patch.extend(assignment_fields(&tx, course_id.as_deref())?);
            if let Some(status) = explicit_status {
                patch.insert("status".into(), status);
            }
        } else {
            patch.remove("assignedCourseId");
        }
    }
    let mut batch = Batch::new();
    batch.update(Collection::Students, id, patch);
    batch.apply(&tx)?;
    let doc = require(&tx, Collection::Students, id)?;
    tx.commit()?;
    activity::record(conn, "updated student", &label(&doc.fields, "name"));
    Ok(doc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceAdjustment {
    Deposit,
    Withdrawal,
}

impl BalanceAdjustment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" | "income" | "topup" => Some(Self::Deposit),
            "withdrawal" | "withdraw" | "expense" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedBalance {
    pub balance: f64,
    pub entry_id: String,
}

/// Manual transaction: one balance increment plus its ledger entry, atomically.
pub fn adjust_balance(
    conn: &Connection,
    student_id: &str,
    kind: BalanceAdjustment,
    amount: f64,
    today: NaiveDate,
) -> Result<AdjustedBalance, StoreError> {
    let amount = amount.abs();
    let tx = store::begin(conn)?;
    let student = Student::from_document(&require(&tx, Collection::Students, student_id)?);
    let (delta, entry_type, title) = match kind {
        BalanceAdjustment::Deposit => (amount, "Income", format!("Balance deposit: {}", student.name)),
        BalanceAdjustment::Withdrawal => (-amount, "Expense", format!("Balance withdrawal: {}", student.name)),
    };

    let mut batch = Batch::new();
    batch.increment(Collection::Students, student_id, "balance", delta);
    let entry_id = batch.create(
        Collection::Finance,
        store::fields(json!({
            "title": title,
            "amount": format_ledger_amount(delta >= 0.0, amount),
            "type": entry_type,
            "category": TUITION_CATEGORY,
            "date": ledger_date(today),
            "studentId": student.id,
            "studentName": student.name,
            "courseId": student.assigned_course_id,
            "createdAt": server_timestamp(),
        })),
    );
    batch.apply(&tx)?;
    let balance = Student::from_document(&require(&tx, Collection::Students, student_id)?).balance;
    tx.commit()?;
    activity::record(conn, "adjusted balance", &format!("{} ({})", student.name, format_ledger_amount(delta >= 0.0, amount)));
    Ok(AdjustedBalance { balance, entry_id })
}

pub fn create_course(conn: &Connection, fields: Fields) -> Result<Document, StoreError> {
    let mut fields = sanitize(fields, &[]);
    fields.entry("status").or_insert_with(|| json!("Live"));
    create_entity(conn, Collection::Courses, fields, "course")
}

/// A title change rewrites every assigned student's `course` in the same batch.
pub fn update_course(conn: &Connection, id: &str, patch: Fields) -> Result<Document, StoreError> {
    let patch = sanitize(patch, &[]);
    let tx = store::begin(conn)?;
    let before = Course::from_document(&require(&tx, Collection::Courses, id)?);
    let new_title = patch
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|t| *t != before.title);

    let mut batch = Batch::new();
    batch.update(Collection::Courses, id, patch);
    if let Some(title) = &new_title {
        for student in store::query(&tx, Collection::Students, &[("assignedCourseId", json!(id))])? {
            batch.update(Collection::Students, student.id, store::fields(json!({ "course": title })));
        }
    }
    let renamed = batch.len() - 1;
    batch.apply(&tx)?;
    let doc = require(&tx, Collection::Courses, id)?;
    tx.commit()?;
    if let Some(title) = new_title {
        log::info!("course '{}' renamed to '{}' ({} student(s) updated)", before.title, title, renamed);
    }
    activity::record(conn, "updated course", &label(&doc.fields, "title"));
    Ok(doc)
}

/// Deletes the course and unassigns its students; finance and attendance stay.
pub fn delete_course(conn: &Connection, id: &str) -> Result<usize, StoreError> {
    let tx = store::begin(conn)?;
    let course = Course::from_document(&require(&tx, Collection::Courses, id)?);
    let roster = store::query(&tx, Collection::Students, &[("assignedCourseId", json!(id))])?;
    let mut batch = Batch::new();
    for student in &roster {
        batch.update(
            Collection::Students,
            student.id.clone(),
            store::fields(json!({
                "assignedCourseId": null,
                "course": UNASSIGNED_COURSE,
                "status": "Pending",
            })),
        );
    }
    batch.delete(Collection::Courses, id);
    batch.apply(&tx)?;
    tx.commit()?;
    activity::record(conn, "deleted course", &course.title);
    Ok(roster.len())
}

pub fn create_lead(conn: &Connection, fields: Fields) -> Result<Document, StoreError> {
    let mut fields = sanitize(fields, &LEAD_PROTECTED);
    fields.insert("status".into(), json!(LeadStatus::New.as_str()));
    if let Some(cid) = fields.get("interestedCourseId").and_then(|v| v.as_str()).map(|s| s.to_string()) {
        if let Some(course) = store::get(conn, Collection::Courses, &cid)? {
            fields
                .entry("courseName")
                .or_insert_with(|| json!(Course::from_document(&course).title));
        }
    }
    create_entity(conn, Collection::Leads, fields, "lead")
}

pub fn update_lead(conn: &Connection, id: &str, patch: Fields) -> Result<Document, StoreError> {
    update_entity(conn, Collection::Leads, id, sanitize(patch, &LEAD_PROTECTED), "lead")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedLead {
    pub lead: Document,
    pub student: Document,
}

/// Enrolls a lead: a new Active student on the interested course and the lead
/// marked Registered with a back-reference, in one batch. The lead stays.
pub fn convert_lead(conn: &Connection, lead_id: &str) -> Result<ConvertedLead, StoreError> {
    let tx = store::begin(conn)?;
    let lead = Lead::from_document(&require(&tx, Collection::Leads, lead_id)?);
    if lead.converted_student_id.is_some() {
        return Err(StoreError::AlreadyExists {
            collection: Collection::Leads.name(),
            id: lead.id,
        });
    }
    let course = match lead.interested_course_id.as_deref() {
        Some(cid) => store::get(&tx, Collection::Courses, cid)?.map(|d| Course::from_document(&d)),
        None => None,
    };
    let mut student = assignment_fields(&tx, course.as_ref().map(|c| c.id.as_str()))?;
    student.extend(store::fields(json!({
        "name": lead.name,
        "phone": lead.phone,
        "balance": 0,
        "leadId": lead.id,
        "createdAt": server_timestamp(),
    })));

    let mut batch = Batch::new();
    let student_id = batch.create(Collection::Students, student);
    batch.update(
        Collection::Leads,
        lead_id,
        store::fields(json!({
            "status": LeadStatus::Registered.as_str(),
            "convertedStudentId": student_id,
        })),
    );
    batch.apply(&tx)?;
    let out = ConvertedLead {
        lead: require(&tx, Collection::Leads, lead_id)?,
        student: require(&tx, Collection::Students, &student_id)?,
    };
    tx.commit()?;
    activity::record(conn, "converted lead", &lead.name);
    Ok(out)
}

/// Manual ledger entry, always dated today.
pub fn create_finance_entry(conn: &Connection, fields: Fields, today: NaiveDate) -> Result<Document, StoreError> {
    let mut fields = sanitize(fields, &[]);
    fields.insert("date".into(), json!(ledger_date(today)));
    create_entity(conn, Collection::Finance, fields, "finance entry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;
    use crate::store::fields;

    fn course(conn: &Connection, title: &str) -> String {
        create_course(conn, fields(json!({ "title": title, "price": 300000 }))).expect("course").id
    }

    fn student(conn: &Connection, name: &str, course_id: Option<&str>) -> Document {
        create_student(conn, fields(json!({ "name": name, "assignedCourseId": course_id }))).expect("student")
    }

    #[test]
    fn create_student_resolves_course_title_and_status() {
        let conn = open_memory();
        let cid = course(&conn, "Math");
        let a = student(&conn, "Ali", Some(&cid));
        assert_eq!(a.str_field("course"), Some("Math"));
        assert_eq!(a.str_field("status"), Some("Active"));
        assert_eq!(a.fields["balance"], json!(0));

        let b = student(&conn, "Bek", None);
        assert_eq!(b.str_field("course"), Some(UNASSIGNED_COURSE));
        assert_eq!(b.str_field("status"), Some("Waiting"));

        let missing = create_student(&conn, fields(json!({ "name": "X", "assignedCourseId": "nope" })));
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn update_student_ignores_balance_and_reassigns() {
        let conn = open_memory();
        let math = course(&conn, "Math");
        let art = course(&conn, "Art");
        let s = student(&conn, "Ali", Some(&math));
        let updated = update_student(
            &conn,
            &s.id,
            fields(json!({ "balance": 999, "assignedCourseId": art, "phone": "+998" })),
        )
        .expect("update");
        assert_eq!(updated.fields["balance"], json!(0));
        assert_eq!(updated.str_field("course"), Some("Art"));
        assert_eq!(updated.str_field("phone"), Some("+998"));
    }

    #[test]
    fn course_rename_cascades_to_assigned_students() {
        let conn = open_memory();
        let cid = course(&conn, "English-A1");
        let other = course(&conn, "Math");
        let a = student(&conn, "Ali", Some(&cid));
        let b = student(&conn, "Bek", Some(&other));

        update_course(&conn, &cid, fields(json!({ "title": "English-A2" }))).expect("rename");
        let a = store::get(&conn, Collection::Students, &a.id).unwrap().unwrap();
        let b = store::get(&conn, Collection::Students, &b.id).unwrap().unwrap();
        assert_eq!(a.str_field("course"), Some("English-A2"));
        assert_eq!(b.str_field("course"), Some("Math"));
    }

    #[test]
    fn course_delete_unassigns_without_touching_ledger() {
        let conn = open_memory();
        let cid = course(&conn, "English-A1");
        let a = student(&conn, "Ali", Some(&cid));
        adjust_balance(&conn, &a.id, BalanceAdjustment::Deposit, 1000.0, NaiveDate::from_ymd_opt(2026, 10, 14).unwrap())
            .expect("deposit");

        assert_eq!(delete_course(&conn, &cid).expect("delete"), 1);
        let a = store::get(&conn, Collection::Students, &a.id).unwrap().unwrap();
        assert_eq!(a.fields["assignedCourseId"], Value::Null);
        assert_eq!(a.str_field("course"), Some(UNASSIGNED_COURSE));
        assert_eq!(a.str_field("status"), Some("Pending"));
        assert!(store::get(&conn, Collection::Courses, &cid).unwrap().is_none());
        assert_eq!(store::list(&conn, Collection::Finance).unwrap().len(), 1);
    }

    #[test]
    fn balance_adjustments_are_deltas_with_ledger_entries() {
        let conn = open_memory();
        let s = student(&conn, "Ali", None);
        let day = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        adjust_balance(&conn, &s.id, BalanceAdjustment::Deposit, 20000.0, day).expect("deposit");
        let out = adjust_balance(&conn, &s.id, BalanceAdjustment::Withdrawal, 5000.0, day).expect("withdraw");
        assert_eq!(out.balance, 15000.0);

        let entries = store::query(&conn, Collection::Finance, &[("studentId", json!(s.id))]).unwrap();
        let amounts: Vec<_> = entries.iter().map(|e| e.str_field("amount").unwrap_or("")).collect();
        assert_eq!(amounts, vec!["+20,000 UZS", "-5,000 UZS"]);
        assert_eq!(entries[0].str_field("date"), Some("14.10.2026"));
    }

    #[test]
    fn converting_a_lead_enrolls_once() {
        let conn = open_memory();
        let cid = course(&conn, "IELTS");
        let lead = create_lead(&conn, fields(json!({ "name": "Dilnoza", "phone": "+998", "interestedCourseId": cid })))
            .expect("lead");
        assert_eq!(lead.str_field("courseName"), Some("IELTS"));

        let converted = convert_lead(&conn, &lead.id).expect("convert");
        assert_eq!(converted.student.str_field("assignedCourseId"), Some(cid.as_str()));
        assert_eq!(converted.student.str_field("status"), Some("Active"));
        assert_eq!(converted.lead.str_field("status"), Some("Registered"));
        assert_eq!(converted.lead.str_field("convertedStudentId"), Some(converted.student.id.as_str()));

        assert!(matches!(convert_lead(&conn, &lead.id), Err(StoreError::AlreadyExists { .. })));
        assert_eq!(store::list(&conn, Collection::Students).unwrap().len(), 1);
        assert_eq!(store::list(&conn, Collection::Leads).unwrap().len(), 1);
    }

    #[test]
    fn manual_entries_are_dated_today() {
        let conn = open_memory();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).expect("date");
        let entry = create_finance_entry(
            &conn,
            fields(json!({ "title": "Rent", "type": "Expense", "amount": "-500000", "date": "01.01.2020" })),
            today,
        )
        .expect("entry");
        assert_eq!(entry.str_field("date"), Some("16.10.2026"));
        assert_eq!(entry.str_field("title"), Some("Rent"));
    }

    #[test]
    fn delete_missing_entity_is_not_found() {
        let conn = open_memory();
        let res = delete_entity(&conn, Collection::Teachers, "ghost", "teacher");
        assert!(matches!(res, Err(StoreError::NotFound { .. })));
    }
}
