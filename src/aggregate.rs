//! Derived read models. Everything here is a pure function of a snapshot.

use crate::model::{Course, CourseStatus, EntryKind, FinanceEntry, MarkStatus};
use crate::schedule::{is_lesson_scheduled_on, parse_time_range};
use crate::snapshot::Snapshot;
use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};

const DEFAULT_LESSON_MINUTES: i64 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub total_students: usize,
    pub total_teachers: usize,
    pub active_courses: usize,
    pub total_revenue: f64,
    pub income: f64,
    pub expense: f64,
    pub debtors: usize,
}

impl DashboardStats {
    pub fn to_json(&self) -> Value {
        json!({
            "totalStudents": self.total_students,
            "totalTeachers": self.total_teachers,
            "activeCourses": self.active_courses,
            "totalRevenue": self.total_revenue,
            "income": self.income,
            "expense": self.expense,
            "debtors": self.debtors,
        })
    }
}

pub fn dashboard_stats(snapshot: &Snapshot) -> DashboardStats {
    let active_courses = snapshot
        .courses
        .iter()
        .filter(|c| !matches!(c.status, Some(CourseStatus::Paused) | Some(CourseStatus::Completed)))
        .count();
    let mut total_revenue = 0.0;
    let mut income = 0.0;
    let mut expense = 0.0;
    for entry in &snapshot.finance {
        let amount = entry.amount.or_zero();
        total_revenue += amount;
        match entry.kind {
            EntryKind::Income => income += amount.abs(),
            EntryKind::Expense => expense += amount.abs(),
            EntryKind::Other(_) => {}
        }
    }
    DashboardStats {
        total_students: snapshot.students.len(),
        total_teachers: snapshot.teachers.len(),
        active_courses,
        total_revenue,
        income,
        expense,
        debtors: snapshot.students.iter().filter(|s| s.is_debtor()).count(),
    }
}

/// Stored Paused wins; otherwise the course's dates decide.
pub fn course_derived_status(course: &Course, now: NaiveDateTime) -> CourseStatus {
    if course.status == Some(CourseStatus::Paused) {
        return CourseStatus::Paused;
    }
    if course.start_date.is_some_and(|start| start > now) {
        return CourseStatus::Upcoming;
    }
    if course.end_date.is_some_and(|end| end < now) {
        return CourseStatus::Completed;
    }
    CourseStatus::Live
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceHistoryRow {
    pub record_id: String,
    pub date: String,
    pub course_id: String,
    pub course_name: String,
    pub status: MarkStatus,
    pub reason: String,
    pub note: String,
    pub homework: String,
}

impl AttendanceHistoryRow {
    pub fn to_json(&self) -> Value {
        json!({
            "recordId": self.record_id,
            "date": self.date,
            "courseId": self.course_id,
            "courseName": self.course_name,
            "status": self.status.as_str(),
            "reason": self.reason,
            "note": self.note,
            "homework": self.homework,
        })
    }
}

/// Every mark the student has, newest date first.
pub fn student_attendance_history(snapshot: &Snapshot, student_id: &str) -> Vec<AttendanceHistoryRow> {
    let mut rows: Vec<AttendanceHistoryRow> = snapshot
        .attendance
        .iter()
        .filter_map(|record| {
            let mark = record.students.get(student_id)?;
            Some(AttendanceHistoryRow {
                record_id: record.id.clone(),
                date: record.date.clone(),
                course_id: record.course_id.clone(),
                course_name: record.course_name.clone(),
                status: mark.status,
                reason: mark.reason.clone(),
                note: mark.note.clone(),
                homework: mark.homework.clone(),
            })
        })
        .collect();
    // ISO dates sort lexically.
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    rows
}

/// Ledger entries for one student, newest first.
pub fn student_finance_history<'a>(
    snapshot: &'a Snapshot,
    student_id: &str,
    limit: Option<usize>,
) -> Vec<&'a FinanceEntry> {
    let mut out: Vec<&FinanceEntry> = snapshot
        .finance
        .iter()
        .filter(|e| e.student_id.as_deref() == Some(student_id))
        .collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}

/// Whole-number percentage of Present marks; `None` without history.
pub fn attendance_rate(snapshot: &Snapshot, student_id: &str) -> Option<f64> {
    let history = student_attendance_history(snapshot, student_id);
    if history.is_empty() {
        return None;
    }
    let present = history.iter().filter(|r| r.status == MarkStatus::Present).count();
    Some((present as f64 * 100.0 / history.len() as f64).round())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseOverview<'a> {
    pub course: &'a Course,
    pub status: CourseStatus,
    pub enrolled: usize,
    pub lesson_today: bool,
    pub in_session_now: bool,
}

impl CourseOverview<'_> {
    pub fn to_json(&self) -> Value {
        let c = self.course;
        json!({
            "id": c.id,
            "title": c.title,
            "instructor": c.instructor,
            "days": c.days.label(),
            "time": c.time,
            "price": c.price.value(),
            "status": self.status.as_str(),
            "enrolled": self.enrolled,
            "lessonToday": self.lesson_today,
            "inSessionNow": self.in_session_now,
        })
    }
}

pub fn course_overview(snapshot: &Snapshot, now: NaiveDateTime) -> Vec<CourseOverview<'_>> {
    snapshot
        .courses
        .iter()
        .map(|course| {
            let lesson_today = is_lesson_scheduled_on(&course.days, now.date());
            let in_session_now = lesson_today
                && course
                    .time
                    .as_deref()
                    .and_then(parse_time_range)
                    .is_some_and(|range| {
                        let start = now.date().and_time(range.start);
                        let end = match range.end {
                            Some(end) => now.date().and_time(end),
                            None => start + Duration::minutes(DEFAULT_LESSON_MINUTES),
                        };
                        start <= now && now < end
                    });
            CourseOverview {
                course,
                status: course_derived_status(course, now),
                enrolled: snapshot.roster(&course.id).count(),
                lesson_today,
                in_session_now,
            }
        })
        .collect()
}
