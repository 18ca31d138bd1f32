//! Typed views over schema-less documents.
//!
//! Readers never fail: missing or malformed fields fall back to neutral values
//! (empty strings, zero balances, `MoneyField::Unparseable`), so the engine only
//! ever works with clean types.

use crate::money::MoneyField;
use crate::schedule::DaysDescriptor;
use crate::store::{Document, Fields};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const UNASSIGNED_COURSE: &str = "Not Assigned";
pub const APP_SETTINGS_ID: &str = "app";

fn text(fields: &Fields, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn opt_text(fields: &Fields, key: &str) -> Option<String> {
    let s = text(fields, key);
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn number(fields: &Fields, key: &str) -> Option<f64> {
    MoneyField::amount(fields.get(key)).value()
}

/// Epoch millis from a server timestamp field, else the document's commit time.
fn created_millis(doc: &Document) -> i64 {
    doc.fields
        .get("createdAt")
        .and_then(|v| v.as_i64())
        .unwrap_or(doc.created_at)
}

/// Reads ISO dates, RFC 3339 timestamps or epoch millis.
pub fn parse_datetime(v: Option<&Value>) -> Option<NaiveDateTime> {
    match v? {
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?).map(|d| d.naive_utc()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(d) = DateTime::parse_from_rfc3339(s) {
                return Some(d.naive_utc());
            }
            if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(d);
            }
            if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
                return Some(d);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentStatus {
    Active,
    Waiting,
    Completed,
    Inactive,
    Pending,
    Other(String),
}

impl StudentStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "waiting" => Self::Waiting,
            "completed" => Self::Completed,
            "inactive" => Self::Inactive,
            "pending" => Self::Pending,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "Active",
            Self::Waiting => "Waiting",
            Self::Completed => "Completed",
            Self::Inactive => "Inactive",
            Self::Pending => "Pending",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub assigned_course_id: Option<String>,
    pub course: String,
    pub status: StudentStatus,
    pub balance: f64,
    pub payment_plan: Option<String>,
    pub attendance_rate: Option<f64>,
    pub created_at: i64,
}

impl Student {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            name: text(f, "name"),
            phone: text(f, "phone"),
            assigned_course_id: opt_text(f, "assignedCourseId"),
            course: opt_text(f, "course").unwrap_or_else(|| UNASSIGNED_COURSE.to_string()),
            status: StudentStatus::parse(&text(f, "status")),
            balance: MoneyField::amount(f.get("balance")).or_zero(),
            payment_plan: opt_text(f, "paymentPlan"),
            attendance_rate: number(f, "attendanceRate"),
            created_at: created_millis(doc),
        }
    }

    pub fn is_debtor(&self) -> bool {
        self.balance < 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub phone: String,
    pub salary_type: String,
    pub weekly_hours: Option<f64>,
    pub assigned_courses: Vec<String>,
    pub status: String,
}

impl Teacher {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let assigned_courses = f
            .get("assignedCourses")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: doc.id.clone(),
            name: text(f, "name"),
            subject: text(f, "subject"),
            phone: text(f, "phone"),
            salary_type: text(f, "salaryType"),
            weekly_hours: number(f, "weeklyHours"),
            assigned_courses,
            status: text(f, "status"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseStatus {
    Live,
    Upcoming,
    Completed,
    Paused,
}

impl CourseStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "active" => Some(Self::Live),
            "upcoming" => Some(Self::Upcoming),
            "completed" => Some(Self::Completed),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::Upcoming => "Upcoming",
            Self::Completed => "Completed",
            Self::Paused => "Paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub instructor: String,
    pub instructor_id: Option<String>,
    pub price: MoneyField,
    pub days: DaysDescriptor,
    pub time: Option<String>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub status: Option<CourseStatus>,
    pub students_count: Option<i64>,
}

impl Course {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let instructor = opt_text(f, "instructor")
            .or_else(|| opt_text(f, "teacher"))
            .unwrap_or_default();
        Self {
            id: doc.id.clone(),
            title: text(f, "title"),
            instructor,
            instructor_id: opt_text(f, "instructorId"),
            price: MoneyField::price(f.get("price")),
            days: DaysDescriptor::from_value(f.get("days")),
            time: opt_text(f, "time"),
            start_date: parse_datetime(f.get("startDate")),
            end_date: parse_datetime(f.get("endDate")),
            status: CourseStatus::parse(&text(f, "status")),
            students_count: number(f, "studentsCount").map(|n| n as i64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: String,
    pub title: String,
    pub price: MoneyField,
}

impl Subject {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: text(&doc.fields, "title"),
            price: MoneyField::price(doc.fields.get("price")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadStatus {
    New,
    Contacted,
    Interested,
    Registered,
    Lost,
}

impl LeadStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "interested" => Some(Self::Interested),
            "registered" | "enrolled" => Some(Self::Registered),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Contacted => "Contacted",
            Self::Interested => "Interested",
            Self::Registered => "Registered",
            Self::Lost => "Lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub source: String,
    pub interested_course_id: Option<String>,
    pub course_name: String,
    pub status: LeadStatus,
    pub notes: String,
    pub converted_student_id: Option<String>,
    pub created_at: i64,
}

impl Lead {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            name: text(f, "name"),
            phone: text(f, "phone"),
            source: text(f, "source"),
            interested_course_id: opt_text(f, "interestedCourseId"),
            course_name: text(f, "courseName"),
            status: LeadStatus::parse(&text(f, "status")).unwrap_or(LeadStatus::New),
            notes: text(f, "notes"),
            converted_student_id: opt_text(f, "convertedStudentId"),
            created_at: created_millis(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Income,
    Expense,
    Other(String),
}

impl EntryKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Self::Income,
            "expense" => Self::Expense,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Income => "Income",
            Self::Expense => "Expense",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinanceEntry {
    pub id: String,
    pub title: String,
    pub amount: MoneyField,
    pub kind: EntryKind,
    pub category: String,
    pub date: String,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub course_id: Option<String>,
    pub created_at: i64,
}

impl FinanceEntry {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            title: text(f, "title"),
            amount: MoneyField::amount(f.get("amount")),
            kind: EntryKind::parse(&text(f, "type")),
            category: text(f, "category"),
            date: text(f, "date"),
            student_id: opt_text(f, "studentId"),
            student_name: opt_text(f, "studentName"),
            course_id: opt_text(f, "courseId"),
            created_at: created_millis(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub title: String,
    pub course_id: Option<String>,
}

impl ScheduleEntry {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            date: text(f, "date"),
            start_time: text(f, "startTime"),
            end_time: text(f, "endTime"),
            title: text(f, "title"),
            course_id: opt_text(f, "courseId"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStatus {
    Present,
    Absent,
}

impl MarkStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceMark {
    pub status: MarkStatus,
    pub reason: String,
    pub note: String,
    pub homework: String,
    /// Display name at the time of marking; survives student deletion.
    pub name: Option<String>,
}

impl AttendanceMark {
    pub fn present() -> Self {
        Self {
            status: MarkStatus::Present,
            reason: String::new(),
            note: String::new(),
            homework: "1".to_string(),
            name: None,
        }
    }

    pub fn from_value(v: &Value) -> Self {
        let empty = Map::new();
        let f = v.as_object().unwrap_or(&empty);
        Self {
            status: MarkStatus::parse(&text(f, "status")).unwrap_or(MarkStatus::Present),
            reason: text(f, "reason"),
            note: text(f, "note"),
            homework: text(f, "homework"),
            name: opt_text(f, "name"),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "status": self.status.as_str(),
            "reason": self.reason,
            "note": self.note,
            "homework": self.homework,
        });
        if let Some(name) = &self.name {
            out["name"] = Value::String(name.clone());
        }
        out
    }
}

pub fn marks_to_json(marks: &BTreeMap<String, AttendanceMark>) -> Value {
    Value::Object(
        marks
            .iter()
            .map(|(id, m)| (id.clone(), m.to_json()))
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub course_time: String,
    pub course_days: String,
    pub date: String,
    pub students: BTreeMap<String, AttendanceMark>,
    pub timestamp: Option<i64>,
    pub created_at: i64,
}

impl AttendanceRecord {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        let students = f
            .get("students")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .map(|(id, v)| (id.clone(), AttendanceMark::from_value(v)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: doc.id.clone(),
            course_id: text(f, "courseId"),
            course_name: text(f, "courseName"),
            course_time: text(f, "courseTime"),
            course_days: DaysDescriptor::from_value(f.get("courseDays")).label(),
            date: text(f, "date"),
            students,
            timestamp: f.get("timestamp").and_then(|v| v.as_i64()),
            created_at: created_millis(doc),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "courseId": self.course_id,
            "courseName": self.course_name,
            "courseTime": self.course_time,
            "courseDays": self.course_days,
            "date": self.date,
            "students": marks_to_json(&self.students),
            "timestamp": self.timestamp,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub action: String,
    pub target: String,
    pub time: String,
    pub created_at: i64,
}

impl Activity {
    pub fn from_document(doc: &Document) -> Self {
        let f = &doc.fields;
        Self {
            id: doc.id.clone(),
            name: text(f, "name"),
            action: text(f, "action"),
            target: text(f, "target"),
            time: text(f, "time"),
            created_at: created_millis(doc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceFormat {
    Default,
    Simple,
    Compact,
}

impl AttendanceFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "simple" => Some(Self::Simple),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Simple => "simple",
            Self::Compact => "compact",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub attendance_format: AttendanceFormat,
    pub enable_google_sheets: bool,
    pub google_sheets_url: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            attendance_format: AttendanceFormat::Default,
            enable_google_sheets: false,
            google_sheets_url: String::new(),
        }
    }
}

impl AppSettings {
    pub fn from_document(doc: Option<&Document>) -> Self {
        let mut out = Self::default();
        let Some(doc) = doc else { return out };
        let f = &doc.fields;
        if let Some(fmt) = AttendanceFormat::parse(&text(f, "attendanceFormat")) {
            out.attendance_format = fmt;
        }
        if let Some(b) = f.get("enableGoogleSheets").and_then(|v| v.as_bool()) {
            out.enable_google_sheets = b;
        }
        out.google_sheets_url = text(f, "googleSheetsUrl").trim().to_string();
        out
    }

    /// Sync target when syncing is switched on and a URL is configured.
    pub fn sync_target(&self) -> Option<&str> {
        if self.enable_google_sheets && !self.google_sheets_url.is_empty() {
            Some(&self.google_sheets_url)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "attendanceFormat": self.attendance_format.as_str(),
            "enableGoogleSheets": self.enable_google_sheets,
            "googleSheetsUrl": self.google_sheets_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, v: Value) -> Document {
        Document {
            id: id.to_string(),
            fields: crate::store::fields(v),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn student_reader_tolerates_loose_fields() {
        let s = Student::from_document(&doc(
            "s1",
            json!({ "name": "Ali", "balance": "-15000", "assignedCourseId": "", "status": "waiting" }),
        ));
        assert_eq!(s.balance, -15000.0);
        assert_eq!(s.assigned_course_id, None);
        assert_eq!(s.course, UNASSIGNED_COURSE);
        assert_eq!(s.status, StudentStatus::Waiting);
        assert!(s.is_debtor());

        let bare = Student::from_document(&doc("s2", json!({})));
        assert_eq!(bare.balance, 0.0);
        assert_eq!(bare.name, "");
    }

    #[test]
    fn course_reader_normalizes_price_and_dates() {
        let c = Course::from_document(&doc(
            "c1",
            json!({
                "title": "English-A1",
                "price": "300 000",
                "days": "DCHJ",
                "time": "14:00 - 15:30",
                "startDate": "2026-09-01T00:00:00.000Z",
                "status": "Paused"
            }),
        ));
        assert_eq!(c.price.value(), Some(300000.0));
        assert_eq!(c.status, Some(CourseStatus::Paused));
        assert_eq!(
            c.start_date.map(|d| d.date()),
            NaiveDate::from_ymd_opt(2026, 9, 1)
        );
    }

    #[test]
    fn attendance_marks_default_unknown_status_to_present() {
        let r = AttendanceRecord::from_document(&doc(
            "a1",
            json!({
                "courseId": "c1",
                "date": "2026-10-14",
                "students": { "s1": { "status": "absent", "reason": "sick" }, "s2": { "status": "??" } }
            }),
        ));
        assert_eq!(r.students["s1"].status, MarkStatus::Absent);
        assert_eq!(r.students["s1"].reason, "sick");
        assert_eq!(r.students["s2"].status, MarkStatus::Present);
    }

    #[test]
    fn settings_sync_target_requires_flag_and_url() {
        let mut s = AppSettings::default();
        assert_eq!(s.sync_target(), None);
        s.google_sheets_url = "https://example.test/hook".into();
        assert_eq!(s.sync_target(), None);
        s.enable_google_sheets = true;
        assert_eq!(s.sync_target(), Some("https://example.test/hook"));
    }
}
