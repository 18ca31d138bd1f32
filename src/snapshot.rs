//! Point-in-time view of every collection, plus the per-workspace cache that
//! reloads it when the store revision moves.

use crate::model::{
    Activity, AppSettings, AttendanceRecord, Course, FinanceEntry, Lead, ScheduleEntry, Student,
    Subject, Teacher, APP_SETTINGS_ID,
};
use crate::store::{self, Collection, Document, StoreError};
use rusqlite::Connection;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub revision: i64,
    pub students: Vec<Student>,
    pub teachers: Vec<Teacher>,
    pub courses: Vec<Course>,
    pub subjects: Vec<Subject>,
    pub leads: Vec<Lead>,
    pub finance: Vec<FinanceEntry>,
    pub schedule: Vec<ScheduleEntry>,
    pub attendance: Vec<AttendanceRecord>,
    pub activities: Vec<Activity>,
    pub settings: AppSettings,
}

fn load_all<T>(
    conn: &Connection,
    collection: Collection,
    read: impl Fn(&Document) -> T,
) -> Result<Vec<T>, StoreError> {
    Ok(store::list(conn, collection)?.iter().map(read).collect())
}

impl Snapshot {
    pub fn load(conn: &Connection) -> Result<Self, StoreError> {
        // Revision first: a commit landing mid-load only makes the next check reload.
        let revision = store::revision(conn)?;
        let settings_doc = store::get(conn, Collection::Settings, APP_SETTINGS_ID)?;
        Ok(Self {
            revision,
            students: load_all(conn, Collection::Students, Student::from_document)?,
            teachers: load_all(conn, Collection::Teachers, Teacher::from_document)?,
            courses: load_all(conn, Collection::Courses, Course::from_document)?,
            subjects: load_all(conn, Collection::Subjects, Subject::from_document)?,
            leads: load_all(conn, Collection::Leads, Lead::from_document)?,
            finance: load_all(conn, Collection::Finance, FinanceEntry::from_document)?,
            schedule: load_all(conn, Collection::Schedule, ScheduleEntry::from_document)?,
            attendance: load_all(conn, Collection::Attendance, AttendanceRecord::from_document)?,
            activities: load_all(conn, Collection::Activities, Activity::from_document)?,
            settings: AppSettings::from_document(settings_doc.as_ref()),
        })
    }

    pub fn course(&self, id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn roster<'a>(&'a self, course_id: &'a str) -> impl Iterator<Item = &'a Student> + 'a {
        self.students
            .iter()
            .filter(move |s| s.assigned_course_id.as_deref() == Some(course_id))
    }
}

/// Holds the latest snapshot of the open workspace.
#[derive(Debug, Default)]
pub struct SessionCache {
    current: Option<Rc<Snapshot>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached snapshot, reloaded first if anything was committed since.
    pub fn snapshot(&mut self, conn: &Connection) -> Result<Rc<Snapshot>, StoreError> {
        let revision = store::revision(conn)?;
        if let Some(snap) = &self.current {
            if snap.revision == revision {
                return Ok(Rc::clone(snap));
            }
        }
        let snap = Rc::new(Snapshot::load(conn)?);
        log::debug!("snapshot reloaded at revision {}", snap.revision);
        self.current = Some(Rc::clone(&snap));
        Ok(snap)
    }

    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
