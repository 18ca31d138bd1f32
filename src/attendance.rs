//! One attendance record per course per day, merged against the current roster.

use crate::activity;
use crate::model::{AppSettings, AttendanceMark, AttendanceRecord, Course, Student, APP_SETTINGS_ID};
use crate::store::{self, server_timestamp, Batch, Collection, Document, StoreError};
use crate::sync;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub type Marks = BTreeMap<String, AttendanceMark>;

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
}

/// Stored marks survive, roster students without one get the default, and
/// supplied marks win. Supplied marks for ids that are neither on the roster nor
/// in the stored record are dropped.
pub fn merge_marks(existing: Option<&Marks>, roster: &[RosterEntry], supplied: &Marks) -> Marks {
    let mut out: Marks = existing.cloned().unwrap_or_default();
    for entry in roster {
        let mark = out.entry(entry.id.clone()).or_insert_with(AttendanceMark::present);
        mark.name = Some(entry.name.clone());
    }
    for (id, mark) in supplied {
        match out.get_mut(id) {
            Some(current) => {
                let name = current.name.take();
                *current = mark.clone();
                if current.name.is_none() {
                    current.name = name;
                }
            }
            None => log::debug!("ignoring mark for {} who is not on the roster", id),
        }
    }
    out
}

fn roster_of(conn: &Connection, course_id: &str) -> Result<Vec<RosterEntry>, StoreError> {
    Ok(store::query(conn, Collection::Students, &[("assignedCourseId", json!(course_id))])?
        .iter()
        .map(Student::from_document)
        .map(|s| RosterEntry { id: s.id, name: s.name })
        .collect())
}

fn load_course(conn: &Connection, course_id: &str) -> Result<Course, StoreError> {
    store::get(conn, Collection::Courses, course_id)?
        .map(|d| Course::from_document(&d))
        .ok_or_else(|| StoreError::NotFound {
            collection: Collection::Courses.name(),
            id: course_id.to_string(),
        })
}

fn find_record(conn: &Connection, course_id: &str, date: &str) -> Result<Option<Document>, StoreError> {
    Ok(store::query(
        conn,
        Collection::Attendance,
        &[("courseId", json!(course_id)), ("date", json!(date))],
    )?
    .into_iter()
    .next())
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendancePreview {
    pub record_id: Option<String>,
    pub course: Course,
    pub date: String,
    pub roster: Vec<RosterEntry>,
    pub marks: Marks,
}

impl AttendancePreview {
    pub fn is_editing(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn to_json(&self) -> Value {
        let roster: Vec<Value> = self
            .roster
            .iter()
            .map(|r| json!({ "id": r.id, "name": r.name }))
            .collect();
        json!({
            "recordId": self.record_id,
            "isEditing": self.is_editing(),
            "courseId": self.course.id,
            "courseName": self.course.title,
            "date": self.date,
            "roster": roster,
            "students": crate::model::marks_to_json(&self.marks),
        })
    }
}

/// What the attendance screen opens with: stored marks merged over the roster.
pub fn preview_attendance(conn: &Connection, course_id: &str, date: NaiveDate) -> Result<AttendancePreview, StoreError> {
    let course = load_course(conn, course_id)?;
    let roster = roster_of(conn, course_id)?;
    let date = iso(date);
    let existing = find_record(conn, course_id, &date)?.map(|d| AttendanceRecord::from_document(&d));
    let marks = merge_marks(existing.as_ref().map(|r| &r.students), &roster, &Marks::new());
    Ok(AttendancePreview {
        record_id: existing.map(|r| r.id),
        course,
        date,
        roster,
        marks,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedAttendance {
    pub record: AttendanceRecord,
    pub created: bool,
    pub sync_queued: bool,
}

/// Find-or-create for `(course_id, date)` inside one IMMEDIATE transaction.
/// Sync payloads are queued in the same transaction; nothing is sent here.
pub fn save_or_update_attendance(
    conn: &Connection,
    course_id: &str,
    date: NaiveDate,
    supplied: &Marks,
) -> Result<SavedAttendance, StoreError> {
    let tx = store::begin(conn)?;
    let course = load_course(&tx, course_id)?;
    let roster = roster_of(&tx, course_id)?;
    let date = iso(date);
    let existing = find_record(&tx, course_id, &date)?;
    let existing_record = existing.as_ref().map(AttendanceRecord::from_document);
    let marks = merge_marks(existing_record.as_ref().map(|r| &r.students), &roster, supplied);

    let mut fields = store::fields(json!({
        "courseId": course.id,
        "courseName": course.title,
        "courseTime": course.time.clone().unwrap_or_default(),
        "courseDays": course.days.label(),
        "date": date,
        "students": crate::model::marks_to_json(&marks),
        "timestamp": server_timestamp(),
    }));
    let mut batch = Batch::new();
    let (id, created) = match &existing {
        Some(doc) => {
            let created_at = doc.fields.get("createdAt").cloned().unwrap_or(json!(doc.created_at));
            fields.insert("createdAt".into(), created_at);
            batch.set(Collection::Attendance, doc.id.clone(), fields, false);
            (doc.id.clone(), false)
        }
        None => {
            fields.insert("createdAt".into(), server_timestamp());
            let id = batch.create(Collection::Attendance, fields);
            activity::push(&mut batch, "marked attendance", &format!("{} ({})", course.title, date));
            (id, true)
        }
    };
    let commit = batch.apply(&tx)?;

    let record = match store::get(&tx, Collection::Attendance, &id)? {
        Some(doc) => AttendanceRecord::from_document(&doc),
        None => {
            return Err(StoreError::NotFound {
                collection: Collection::Attendance.name(),
                id,
            })
        }
    };

    let settings = AppSettings::from_document(store::get(&tx, Collection::Settings, APP_SETTINGS_ID)?.as_ref());
    let sync_queued = match settings.sync_target() {
        Some(url) => {
            // Kept marks may belong to students now on another course.
            let names: BTreeMap<String, String> = store::list(&tx, Collection::Students)?
                .iter()
                .map(Student::from_document)
                .map(|s| (s.id, s.name))
                .filter(|(_, name)| !name.trim().is_empty())
                .collect();
            let payload = sync::build_sync_payload(&record, settings.attendance_format, commit.timestamp, |sid| {
                names.get(sid).cloned()
            });
            sync::enqueue(&tx, url, &payload, chrono::Utc::now().timestamp_millis())?;
            true
        }
        None => false,
    };
    tx.commit()?;

    log::info!(
        "attendance for '{}' on {} {} ({} marks)",
        record.course_name,
        record.date,
        if created { "created" } else { "updated" },
        record.students.len()
    );
    Ok(SavedAttendance {
        record,
        created,
        sync_queued,
    })
}
