//! Daily per-lesson fee deduction.
//!
//! Each course is charged at most once per calendar day. The guarantee lives in
//! the store: the `dailyDeductions/<courseId>_<date>` marker is created with a
//! create-if-absent op in the same batch as every balance increment and ledger
//! entry, so a second caller racing the first aborts without side effects.

use crate::activity;
use crate::model::Course;
use crate::money::{daily_fee, DEFAULT_LESSONS_PER_MONTH};
use crate::schedule::{is_lesson_scheduled_on, parse_time_range};
use crate::snapshot::Snapshot;
use crate::store::{self, server_timestamp, Batch, Collection, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::{json, Value};

pub const DEDUCTION_CATEGORY: &str = "automatic deduction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeductionPolicy {
    pub lessons_per_month: u32,
}

impl Default for DeductionPolicy {
    fn default() -> Self {
        Self {
            lessons_per_month: DEFAULT_LESSONS_PER_MONTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseOutcome {
    NotScheduled,
    NoStartTime,
    NotStarted,
    NoFee,
    AlreadyProcessed,
    Deducted { fee: i64, students: usize },
    Failed { message: String },
}

impl CourseOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotScheduled => "not_scheduled",
            Self::NoStartTime => "no_start_time",
            Self::NotStarted => "not_started",
            Self::NoFee => "no_fee",
            Self::AlreadyProcessed => "already_processed",
            Self::Deducted { .. } => "deducted",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseReport {
    pub course_id: String,
    pub title: String,
    pub outcome: CourseOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionReport {
    pub date: NaiveDate,
    pub courses: Vec<CourseReport>,
}

impl DeductionReport {
    pub fn deducted(&self) -> impl Iterator<Item = &CourseReport> {
        self.courses
            .iter()
            .filter(|c| matches!(c.outcome, CourseOutcome::Deducted { .. }))
    }

    pub fn to_json(&self) -> Value {
        let courses: Vec<Value> = self
            .courses
            .iter()
            .map(|c| {
                let mut row = json!({
                    "courseId": c.course_id,
                    "title": c.title,
                    "outcome": c.outcome.code(),
                });
                match &c.outcome {
                    CourseOutcome::Deducted { fee, students } => {
                        row["fee"] = json!(fee);
                        row["students"] = json!(students);
                    }
                    CourseOutcome::Failed { message } => {
                        row["message"] = json!(message);
                    }
                    _ => {}
                }
                row
            })
            .collect();
        json!({
            "date": self.date.format("%Y-%m-%d").to_string(),
            "deducted": self.deducted().count(),
            "courses": courses,
        })
    }
}

pub fn marker_id(course_id: &str, date: NaiveDate) -> String {
    format!("{}_{}", course_id, date.format("%Y-%m-%d"))
}

/// Runs one pass over every course. Safe to call any number of times a day.
pub fn process_daily_deductions(
    conn: &Connection,
    snapshot: &Snapshot,
    now: NaiveDateTime,
    policy: DeductionPolicy,
) -> DeductionReport {
    let today = now.date();
    let courses = snapshot
        .courses
        .iter()
        .map(|course| {
            let outcome = process_course(conn, snapshot, course, now, policy);
            match &outcome {
                CourseOutcome::Deducted { fee, students } => log::info!(
                    "deducted {} from {} student(s) of '{}' for {}",
                    fee,
                    students,
                    course.title,
                    today
                ),
                CourseOutcome::Failed { message } => log::error!(
                    "deduction for '{}' on {} failed: {}",
                    course.title,
                    today,
                    message
                ),
                other => log::debug!("'{}' skipped: {}", course.title, other.code()),
            }
            CourseReport {
                course_id: course.id.clone(),
                title: course.title.clone(),
                outcome,
            }
        })
        .collect();
    DeductionReport {
        date: today,
        courses,
    }
}

fn process_course(
    conn: &Connection,
    snapshot: &Snapshot,
    course: &Course,
    now: NaiveDateTime,
    policy: DeductionPolicy,
) -> CourseOutcome {
    let today = now.date();
    if !is_lesson_scheduled_on(&course.days, today) {
        return CourseOutcome::NotScheduled;
    }
    let Some(range) = course.time.as_deref().and_then(parse_time_range) else {
        return CourseOutcome::NoStartTime;
    };
    if now.time() < range.start {
        return CourseOutcome::NotStarted;
    }
    let Some(fee) = daily_fee(&course.price, policy.lessons_per_month) else {
        return CourseOutcome::NoFee;
    };

    let marker = marker_id(&course.id, today);
    match store::exists(conn, Collection::DailyDeductions, &marker) {
        Ok(true) => return CourseOutcome::AlreadyProcessed,
        Ok(false) => {}
        Err(e) => {
            return CourseOutcome::Failed {
                message: e.to_string(),
            }
        }
    }

    let date = today.format("%Y-%m-%d").to_string();
    let ledger_date = today.format("%d.%m.%Y").to_string();
    let mut batch = Batch::new();
    batch.create_if_absent(
        Collection::DailyDeductions,
        marker,
        store::fields(json!({
            "courseId": course.id,
            "date": date,
            "processedAt": server_timestamp(),
        })),
    );
    let mut students = 0;
    for student in snapshot.roster(&course.id) {
        batch.increment(Collection::Students, &student.id, "balance", -(fee as f64));
        batch.create(
            Collection::Finance,
            store::fields(json!({
                "title": format!("{} - automatic lesson fee", course.title),
                "amount": format!("-{}", fee),
                "type": "Expense",
                "category": DEDUCTION_CATEGORY,
                "date": ledger_date,
                "studentId": student.id,
                "studentName": student.name,
                "courseId": course.id,
                "createdAt": server_timestamp(),
            })),
        );
        students += 1;
    }
    activity::push(
        &mut batch,
        "automatic deduction",
        &format!("{}: {} UZS from {} student(s)", course.title, fee, students),
    );

    match batch.commit(conn) {
        Ok(_) => CourseOutcome::Deducted { fee, students },
        Err(StoreError::AlreadyExists {
            collection: "dailyDeductions",
            ..
        }) => CourseOutcome::AlreadyProcessed,
        Err(e) => CourseOutcome::Failed {
            message: e.to_string(),
        },
    }
}
