//! Outbound attendance sync.
//!
//! Payloads are written to `sync_outbox` in the same transaction as the
//! attendance record they describe. Delivery happens later, either from the
//! background [`SyncWorker`] or an explicit `sync.flush`, and a row is leased
//! before it is sent so two flushers never post it twice.

use crate::config::SyncConfig;
use crate::db;
use crate::model::{AttendanceFormat, AttendanceRecord, MarkStatus};
use anyhow::{anyhow, Context};
use chrono::{DateTime, SecondsFormat};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

const LEASE_MS: i64 = 120_000;
const FLUSH_BATCH: i64 = 50;

/// Serializes one attendance record for the spreadsheet endpoint. `resolve_name`
/// looks a student up by id; embedded names cover students deleted since.
pub fn build_sync_payload(
    record: &AttendanceRecord,
    format: AttendanceFormat,
    committed_at_ms: i64,
    resolve_name: impl Fn(&str) -> Option<String>,
) -> Value {
    let name_of = |id: &str, embedded: &Option<String>| {
        resolve_name(id)
            .or_else(|| embedded.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    let attendance = match format {
        AttendanceFormat::Default => Value::Array(
            record
                .students
                .iter()
                .map(|(id, m)| {
                    let homework = if m.homework.is_empty() { "0" } else { m.homework.as_str() };
                    json!({
                        "id": id,
                        "name": name_of(id, &m.name),
                        "status": m.status.as_str(),
                        "reason": m.reason,
                        "note": m.note,
                        "homework": homework,
                    })
                })
                .collect(),
        ),
        AttendanceFormat::Simple => {
            let present = record
                .students
                .values()
                .filter(|m| m.status == MarkStatus::Present)
                .count();
            let total = record.students.len();
            json!({ "present": present, "absent": total - present, "total": total })
        }
        AttendanceFormat::Compact => Value::Array(
            record
                .students
                .iter()
                .map(|(id, m)| {
                    let code = if m.status == MarkStatus::Present { "P" } else { "A" };
                    let mut row = json!({
                        "id": id,
                        "name": name_of(id, &m.name),
                        "s": code,
                    });
                    if m.status == MarkStatus::Absent {
                        row["reason"] = json!(m.reason);
                    }
                    row
                })
                .collect(),
        ),
    };
    let timestamp = DateTime::from_timestamp_millis(committed_at_ms)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();
    json!({
        "courseName": record.course_name,
        "courseTime": record.course_time,
        "courseDays": record.course_days,
        "date": record.date,
        "timestamp": timestamp,
        "format": format.as_str(),
        "attendance": attendance,
    })
}

pub fn enqueue(conn: &Connection, url: &str, payload: &Value, now_ms: i64) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sync_outbox(id, url, payload, status, attempts, next_attempt_at, created_at)
         VALUES(?, ?, ?, 'pending', 0, ?, ?)",
        (&id, url, payload.to_string(), now_ms, now_ms),
    )?;
    Ok(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempts - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempts.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub trait Transport {
    fn deliver(&self, url: &str, body: &str) -> anyhow::Result<()>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building sync http client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn deliver(&self, url: &str, body: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(anyhow!("endpoint answered {}", status))
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
}

/// Delivers every due pending row this caller manages to lease.
pub fn flush_due(
    conn: &Connection,
    transport: &dyn Transport,
    policy: RetryPolicy,
    now_ms: i64,
) -> rusqlite::Result<FlushSummary> {
    let due: Vec<(String, String, String, u32)> = {
        let mut stmt = conn.prepare(
            "SELECT id, url, payload, attempts FROM sync_outbox
             WHERE status = 'pending' AND next_attempt_at <= ?1
               AND (leased_until IS NULL OR leased_until < ?1)
             ORDER BY created_at
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((now_ms, FLUSH_BATCH), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    let mut summary = FlushSummary::default();
    for (id, url, payload, attempts) in due {
        let leased = conn.execute(
            "UPDATE sync_outbox SET leased_until = ?1
             WHERE id = ?2 AND status = 'pending'
               AND (leased_until IS NULL OR leased_until < ?3)",
            (now_ms + LEASE_MS, &id, now_ms),
        )?;
        if leased == 0 {
            continue;
        }

        match transport.deliver(&url, &payload) {
            Ok(()) => {
                conn.execute(
                    "UPDATE sync_outbox
                     SET status = 'sent', attempts = attempts + 1, sent_at = ?1,
                         leased_until = NULL, last_error = NULL
                     WHERE id = ?2",
                    (now_ms, &id),
                )?;
                log::info!("attendance sync {} delivered", id);
                summary.sent += 1;
            }
            Err(e) => {
                let attempts = attempts + 1;
                let message = format!("{:#}", e);
                if attempts >= policy.max_attempts {
                    conn.execute(
                        "UPDATE sync_outbox
                         SET status = 'dead', attempts = ?1, leased_until = NULL, last_error = ?2
                         WHERE id = ?3",
                        (attempts, &message, &id),
                    )?;
                    log::warn!("attendance sync {} gave up after {} attempts: {}", id, attempts, message);
                    summary.dead += 1;
                } else {
                    let delay_ms = policy.backoff(attempts).as_millis() as i64;
                    conn.execute(
                        "UPDATE sync_outbox
                         SET attempts = ?1, next_attempt_at = ?2, leased_until = NULL, last_error = ?3
                         WHERE id = ?4",
                        (attempts, now_ms + delay_ms, &message, &id),
                    )?;
                    log::warn!("attendance sync {} failed (attempt {}): {}", id, attempts, message);
                    summary.failed += 1;
                }
            }
        }
    }
    Ok(summary)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutboxStatus {
    pub pending: i64,
    pub sent: i64,
    pub dead: i64,
    pub last_error: Option<String>,
}

pub fn outbox_status(conn: &Connection) -> rusqlite::Result<OutboxStatus> {
    let mut out = OutboxStatus::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_outbox GROUP BY status")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, n) = row?;
        match status.as_str() {
            "pending" => out.pending = n,
            "sent" => out.sent = n,
            "dead" => out.dead = n,
            _ => {}
        }
    }
    out.last_error = conn
        .query_row(
            "SELECT last_error FROM sync_outbox
             WHERE last_error IS NOT NULL
             ORDER BY created_at DESC LIMIT 1",
            [],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(out)
}

enum Signal {
    Nudge,
    Stop,
}

/// Background flusher with its own connection. Stops when dropped.
pub struct SyncWorker {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(db_path: PathBuf, cfg: SyncConfig) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = std::thread::Builder::new()
            .name("schoold-sync".into())
            .spawn(move || {
                let conn = match db::open_existing(&db_path) {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("sync worker could not open {}: {:#}", db_path.display(), e);
                        return;
                    }
                };
                let transport = match HttpTransport::new(cfg.request_timeout) {
                    Ok(t) => t,
                    Err(e) => {
                        log::error!("sync worker disabled: {:#}", e);
                        return;
                    }
                };
                let policy = RetryPolicy::from(&cfg);
                loop {
                    match rx.recv_timeout(cfg.poll_interval) {
                        Ok(Signal::Nudge) | Err(RecvTimeoutError::Timeout) => {
                            let now = chrono::Utc::now().timestamp_millis();
                            if let Err(e) = flush_due(&conn, &transport, policy, now) {
                                log::warn!("sync flush failed: {}", e);
                            }
                        }
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("sync worker stopped");
            })
            .context("spawning sync worker")?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Wakes the worker early, typically right after an enqueue.
    pub fn nudge(&self) {
        let _ = self.tx.send(Signal::Nudge);
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;
    use crate::model::AttendanceMark;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn record() -> AttendanceRecord {
        let mut students = BTreeMap::new();
        students.insert("s1".to_string(), AttendanceMark::present());
        students.insert(
            "s2".to_string(),
            AttendanceMark {
                status: MarkStatus::Absent,
                reason: "sick".into(),
                note: String::new(),
                homework: String::new(),
                name: Some("Gone Student".into()),
            },
        );
        AttendanceRecord {
            id: "a1".into(),
            course_id: "c1".into(),
            course_name: "English-A1".into(),
            course_time: "14:00".into(),
            course_days: "DCHJ".into(),
            date: "2026-10-14".into(),
            students,
            timestamp: None,
            created_at: 0,
        }
    }

    fn names(id: &str) -> Option<String> {
        (id == "s1").then(|| "Ali".to_string())
    }

    #[test]
    fn default_payload_resolves_names_and_homework() {
        let p = build_sync_payload(&record(), AttendanceFormat::Default, 0, names);
        assert_eq!(p["courseName"], "English-A1");
        assert_eq!(p["format"], "default");
        assert_eq!(p["timestamp"], "1970-01-01T00:00:00.000Z");
        let rows = p["attendance"].as_array().expect("rows");
        assert_eq!(rows[0]["name"], "Ali");
        assert_eq!(rows[0]["homework"], "1");
        assert_eq!(rows[1]["name"], "Gone Student");
        assert_eq!(rows[1]["homework"], "0");
        assert_eq!(rows[1]["status"], "Absent");
    }

    #[test]
    fn simple_and_compact_payloads() {
        let simple = build_sync_payload(&record(), AttendanceFormat::Simple, 0, names);
        assert_eq!(simple["attendance"], json!({ "present": 1, "absent": 1, "total": 2 }));

        let compact = build_sync_payload(&record(), AttendanceFormat::Compact, 0, |_| None);
        let rows = compact["attendance"].as_array().expect("rows");
        assert_eq!(rows[0], json!({ "id": "s1", "name": "Unknown", "s": "P" }));
        assert_eq!(rows[1]["s"], "A");
        assert_eq!(rows[1]["reason"], "sick");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        };
        assert_eq!(p.backoff(1), Duration::from_secs(30));
        assert_eq!(p.backoff(2), Duration::from_secs(60));
        assert_eq!(p.backoff(4), Duration::from_secs(240));
        assert_eq!(p.backoff(10), Duration::from_secs(3600));
        assert_eq!(p.backoff(64), Duration::from_secs(3600));
    }

    struct Scripted {
        fail: bool,
        calls: RefCell<Vec<String>>,
    }

    impl Transport for Scripted {
        fn deliver(&self, url: &str, _body: &str) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(url.to_string());
            if self.fail {
                Err(anyhow!("endpoint answered 500"))
            } else {
                Ok(())
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }

    #[test]
    fn failures_back_off_then_die() {
        let conn = open_memory();
        enqueue(&conn, "https://hook.test/a", &json!({ "x": 1 }), 1_000).expect("enqueue");
        let t = Scripted { fail: true, calls: RefCell::new(Vec::new()) };

        let first = flush_due(&conn, &t, policy(2), 1_000).expect("flush");
        assert_eq!(first.failed, 1);
        // Not due again until the backoff elapses.
        let early = flush_due(&conn, &t, policy(2), 2_000).expect("flush");
        assert_eq!(early, FlushSummary::default());
        let status = outbox_status(&conn).expect("status");
        assert_eq!(status.pending, 1);
        assert_eq!(status.last_error.as_deref(), Some("endpoint answered 500"));

        let second = flush_due(&conn, &t, policy(2), 1_000 + 30_000).expect("flush");
        assert_eq!(second.dead, 1);
        assert_eq!(t.calls.borrow().len(), 2);
        assert_eq!(outbox_status(&conn).expect("status").dead, 1);
    }

    #[test]
    fn delivered_rows_are_not_sent_again() {
        let conn = open_memory();
        enqueue(&conn, "https://hook.test/a", &json!({}), 0).expect("enqueue");
        let t = Scripted { fail: false, calls: RefCell::new(Vec::new()) };
        assert_eq!(flush_due(&conn, &t, policy(8), 10).expect("flush").sent, 1);
        assert_eq!(flush_due(&conn, &t, policy(8), 20).expect("flush").sent, 0);
        assert_eq!(t.calls.borrow().len(), 1);
        assert_eq!(outbox_status(&conn).expect("status").sent, 1);
    }

    #[test]
    fn leased_rows_are_skipped() {
        let conn = open_memory();
        let id = enqueue(&conn, "https://hook.test/a", &json!({}), 0).expect("enqueue");
        conn.execute("UPDATE sync_outbox SET leased_until = ? WHERE id = ?", (10_000i64, &id))
            .expect("lease");
        let t = Scripted { fail: false, calls: RefCell::new(Vec::new()) };
        assert_eq!(flush_due(&conn, &t, policy(8), 5_000).expect("flush"), FlushSummary::default());
        assert!(t.calls.borrow().is_empty());
    }
}
