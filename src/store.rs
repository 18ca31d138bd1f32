//! Schema-less document collections on top of the workspace database.
//!
//! Every document lives in `documents(collection, id, data)` with its fields kept
//! as a JSON object. Multi-document writes go through [`Batch`], which applies all
//! of its operations inside a single IMMEDIATE transaction: either every write
//! lands or none does. Each commit bumps the store revision, which the session
//! cache uses to decide when a snapshot is stale.

use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction,
    TransactionBehavior,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Students,
    Teachers,
    Courses,
    Subjects,
    Leads,
    Finance,
    Schedule,
    Attendance,
    DailyDeductions,
    Activities,
    Settings,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Teachers => "teachers",
            Self::Courses => "courses",
            Self::Subjects => "subjects",
            Self::Leads => "leads",
            Self::Finance => "finance",
            Self::Schedule => "schedule",
            Self::Attendance => "attendance",
            Self::DailyDeductions => "dailyDeductions",
            Self::Activities => "activities",
            Self::Settings => "settings",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection}/{id} not found")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    #[error("{collection}/{id} already exists")]
    AlreadyExists {
        collection: &'static str,
        id: String,
    },
    #[error("unique constraint violated in {collection}: {message}")]
    Conflict {
        collection: &'static str,
        message: String,
    },
    #[error("invalid field name: {0}")]
    BadField(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// Fields plus `id`, the shape handed to the UI.
    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("id".into(), Value::String(self.id.clone()));
        Value::Object(out)
    }
}

const SERVER_VALUE_KEY: &str = ".sv";

/// Placeholder resolved to the commit's server timestamp (epoch millis).
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: "timestamp" })
}

fn is_server_timestamp(v: &Value) -> bool {
    v.as_object()
        .and_then(|o| o.get(SERVER_VALUE_KEY))
        .and_then(|v| v.as_str())
        == Some("timestamp")
        && v.as_object().map(|o| o.len()) == Some(1)
}

fn resolve_server_values(fields: &mut Fields, ts: i64) {
    for v in fields.values_mut() {
        if is_server_timestamp(v) {
            *v = Value::from(ts);
        }
    }
}

fn json_path(field: &str) -> Result<String, StoreError> {
    if field.is_empty() || field.contains('"') {
        return Err(StoreError::BadField(field.to_string()));
    }
    Ok(format!("$.\"{}\"", field))
}

fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn number_sql_value(x: f64) -> SqlValue {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        SqlValue::Integer(x as i64)
    } else {
        SqlValue::Real(x)
    }
}

fn classify(err: rusqlite::Error, collection: Collection) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict {
                collection: collection.name(),
                message: msg.clone().unwrap_or_else(|| e.to_string()),
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

fn decode(
    collection: Collection,
    id: String,
    data: String,
    created_at: i64,
    updated_at: i64,
) -> Document {
    let fields = match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(m)) => m,
        Ok(_) | Err(_) => {
            log::warn!("{}/{} holds non-object data; reading as empty", collection.name(), id);
            Map::new()
        }
    };
    Document {
        id,
        fields,
        created_at,
        updated_at,
    }
}

pub fn get(conn: &Connection, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, data, created_at, updated_at
             FROM documents
             WHERE collection = ? AND id = ?",
            (collection.name(), id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(id, data, c, u)| decode(collection, id, data, c, u)))
}

pub fn exists(conn: &Connection, collection: Collection, id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM documents WHERE collection = ? AND id = ?",
            (collection.name(), id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// All documents of a collection in insertion order.
pub fn list(conn: &Connection, collection: Collection) -> Result<Vec<Document>, StoreError> {
    query(conn, collection, &[])
}

/// Equality query over top-level fields. A `null` filter value matches missing
/// or null fields.
pub fn query(
    conn: &Connection,
    collection: Collection,
    filters: &[(&str, Value)],
) -> Result<Vec<Document>, StoreError> {
    let mut sql = String::from(
        "SELECT id, data, created_at, updated_at FROM documents WHERE collection = ?",
    );
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(collection.name().to_string())];
    for (field, value) in filters {
        bind.push(SqlValue::Text(json_path(field)?));
        if value.is_null() {
            sql.push_str(" AND json_extract(data, ?) IS NULL");
        } else {
            sql.push_str(" AND json_extract(data, ?) = ?");
            bind.push(to_sql_value(value));
        }
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, data, c, u)| decode(collection, id, data, c, u))
        .collect())
}

fn meta_get(conn: &Connection, key: &str) -> Result<i64, StoreError> {
    Ok(conn
        .query_row("SELECT value FROM store_meta WHERE key = ?", [key], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .unwrap_or(0))
}

fn meta_set(conn: &Connection, key: &str, value: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}

/// Store revision; moves on every committed batch.
pub fn revision(conn: &Connection) -> Result<i64, StoreError> {
    meta_get(conn, "revision")
}

/// Monotonic server clock in epoch millis. Must run inside a write transaction.
fn next_timestamp(conn: &Connection) -> Result<i64, StoreError> {
    let last = meta_get(conn, "clock")?;
    let ts = chrono::Utc::now().timestamp_millis().max(last + 1);
    meta_set(conn, "clock", ts)?;
    Ok(ts)
}

/// Starts an IMMEDIATE transaction so the reads that follow see a stable store.
pub fn begin(conn: &Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Fails the batch with `AlreadyExists` when the id is taken.
    Create {
        collection: Collection,
        id: String,
        fields: Fields,
    },
    Set {
        collection: Collection,
        id: String,
        fields: Fields,
        merge: bool,
    },
    /// Top-level merge into an existing document.
    Update {
        collection: Collection,
        id: String,
        patch: Fields,
    },
    /// Adds `delta` to a numeric field (missing counts as 0).
    Increment {
        collection: Collection,
        id: String,
        field: String,
        delta: f64,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub revision: i64,
    pub timestamp: i64,
}

#[derive(Debug, Default, Clone)]
pub struct Batch {
    ops: Vec<WriteOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queues a create under a fresh id and returns that id.
    pub fn create(&mut self, collection: Collection, fields: Fields) -> String {
        let id = Uuid::new_v4().to_string();
        self.ops.push(WriteOp::Create {
            collection,
            id: id.clone(),
            fields,
        });
        id
    }

    pub fn create_if_absent(&mut self, collection: Collection, id: impl Into<String>, fields: Fields) {
        self.ops.push(WriteOp::Create {
            collection,
            id: id.into(),
            fields,
        });
    }

    pub fn set(&mut self, collection: Collection, id: impl Into<String>, fields: Fields, merge: bool) {
        self.ops.push(WriteOp::Set {
            collection,
            id: id.into(),
            fields,
            merge,
        });
    }

    pub fn update(&mut self, collection: Collection, id: impl Into<String>, patch: Fields) {
        self.ops.push(WriteOp::Update {
            collection,
            id: id.into(),
            patch,
        });
    }

    pub fn increment(&mut self, collection: Collection, id: impl Into<String>, field: &str, delta: f64) {
        self.ops.push(WriteOp::Increment {
            collection,
            id: id.into(),
            field: field.to_string(),
            delta,
        });
    }

    pub fn delete(&mut self, collection: Collection, id: impl Into<String>) {
        self.ops.push(WriteOp::Delete {
            collection,
            id: id.into(),
        });
    }

    /// Applies every op on `conn`, which must already be inside a transaction.
    pub fn apply(&self, conn: &Connection) -> Result<Commit, StoreError> {
        let ts = next_timestamp(conn)?;
        for op in &self.ops {
            apply_op(conn, op, ts)?;
        }
        let revision = revision(conn)? + 1;
        meta_set(conn, "revision", revision)?;
        Ok(Commit {
            revision,
            timestamp: ts,
        })
    }

    /// All-or-nothing: a failing op rolls back everything queued before it.
    pub fn commit(self, conn: &Connection) -> Result<Commit, StoreError> {
        let tx = begin(conn)?;
        let commit = self.apply(&tx)?;
        tx.commit()?;
        Ok(commit)
    }
}

fn write_data(
    conn: &Connection,
    collection: Collection,
    id: &str,
    fields: &Fields,
    ts: i64,
) -> Result<(), StoreError> {
    let data = serde_json::to_string(fields)?;
    conn.execute(
        "UPDATE documents SET data = ?, updated_at = ? WHERE collection = ? AND id = ?",
        (&data, ts, collection.name(), id),
    )
    .map_err(|e| classify(e, collection))?;
    Ok(())
}

fn insert_data(
    conn: &Connection,
    collection: Collection,
    id: &str,
    fields: &Fields,
    ts: i64,
) -> Result<(), StoreError> {
    let data = serde_json::to_string(fields)?;
    conn.execute(
        "INSERT INTO documents(collection, id, data, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (collection.name(), id, &data, ts, ts),
    )
    .map_err(|e| classify(e, collection))?;
    Ok(())
}

fn apply_op(conn: &Connection, op: &WriteOp, ts: i64) -> Result<(), StoreError> {
    match op {
        WriteOp::Create {
            collection,
            id,
            fields,
        } => {
            if exists(conn, *collection, id)? {
                return Err(StoreError::AlreadyExists {
                    collection: collection.name(),
                    id: id.clone(),
                });
            }
            let mut fields = fields.clone();
            resolve_server_values(&mut fields, ts);
            insert_data(conn, *collection, id, &fields, ts)
        }
        WriteOp::Set {
            collection,
            id,
            fields,
            merge,
        } => {
            let mut incoming = fields.clone();
            resolve_server_values(&mut incoming, ts);
            match get(conn, *collection, id)? {
                Some(existing) => {
                    let next = if *merge {
                        let mut merged = existing.fields;
                        merged.extend(incoming);
                        merged
                    } else {
                        incoming
                    };
                    write_data(conn, *collection, id, &next, ts)
                }
                None => insert_data(conn, *collection, id, &incoming, ts),
            }
        }
        WriteOp::Update {
            collection,
            id,
            patch,
        } => {
            let Some(existing) = get(conn, *collection, id)? else {
                return Err(StoreError::NotFound {
                    collection: collection.name(),
                    id: id.clone(),
                });
            };
            let mut patch = patch.clone();
            resolve_server_values(&mut patch, ts);
            let mut merged = existing.fields;
            merged.extend(patch);
            write_data(conn, *collection, id, &merged, ts)
        }
        WriteOp::Increment {
            collection,
            id,
            field,
            delta,
        } => {
            let path = json_path(field)?;
            let changed = conn
                .execute(
                    "UPDATE documents
                     SET data = json_set(data, ?1, coalesce(json_extract(data, ?1), 0) + ?2),
                         updated_at = ?3
                     WHERE collection = ?4 AND id = ?5",
                    (
                        &path,
                        number_sql_value(*delta),
                        ts,
                        collection.name(),
                        id.as_str(),
                    ),
                )
                .map_err(|e| classify(e, *collection))?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    collection: collection.name(),
                    id: id.clone(),
                });
            }
            Ok(())
        }
        WriteOp::Delete { collection, id } => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                (collection.name(), id.as_str()),
            )?;
            Ok(())
        }
    }
}

pub fn create(conn: &Connection, collection: Collection, fields: Fields) -> Result<String, StoreError> {
    let mut batch = Batch::new();
    let id = batch.create(collection, fields);
    batch.commit(conn)?;
    Ok(id)
}

pub fn update(conn: &Connection, collection: Collection, id: &str, patch: Fields) -> Result<(), StoreError> {
    let mut batch = Batch::new();
    batch.update(collection, id, patch);
    batch.commit(conn)?;
    Ok(())
}

pub fn set(
    conn: &Connection,
    collection: Collection,
    id: &str,
    fields: Fields,
    merge: bool,
) -> Result<(), StoreError> {
    let mut batch = Batch::new();
    batch.set(collection, id, fields, merge);
    batch.commit(conn)?;
    Ok(())
}

pub fn delete(conn: &Connection, collection: Collection, id: &str) -> Result<(), StoreError> {
    let mut batch = Batch::new();
    batch.delete(collection, id);
    batch.commit(conn)?;
    Ok(())
}

/// Builds a field map from a `json!({...})` literal; non-objects give an empty map.
pub fn fields(v: Value) -> Fields {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;

    #[test]
    fn create_get_and_query_by_field() {
        let conn = open_memory();
        let a = create(&conn, Collection::Students, fields(json!({ "name": "Ali", "assignedCourseId": "c1" })))
            .expect("create a");
        let _b = create(&conn, Collection::Students, fields(json!({ "name": "Vali", "assignedCourseId": null })))
            .expect("create b");

        let doc = get(&conn, Collection::Students, &a).expect("get").expect("exists");
        assert_eq!(doc.str_field("name"), Some("Ali"));

        let in_c1 = query(&conn, Collection::Students, &[("assignedCourseId", json!("c1"))]).expect("query");
        assert_eq!(in_c1.len(), 1);
        assert_eq!(in_c1[0].id, a);

        let unassigned = query(&conn, Collection::Students, &[("assignedCourseId", Value::Null)]).expect("query");
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].str_field("name"), Some("Vali"));
    }

    #[test]
    fn failed_batch_leaves_no_partial_writes() {
        let conn = open_memory();
        let sid = create(&conn, Collection::Students, fields(json!({ "name": "Ali", "balance": 0 })))
            .expect("create");
        let before = revision(&conn).expect("revision");

        let mut batch = Batch::new();
        batch.increment(Collection::Students, &sid, "balance", -100.0);
        batch.update(Collection::Students, "missing", fields(json!({ "name": "x" })));
        let res = batch.commit(&conn);
        assert!(matches!(res, Err(StoreError::NotFound { .. })));

        let doc = get(&conn, Collection::Students, &sid).expect("get").expect("exists");
        assert_eq!(doc.fields.get("balance").and_then(|v| v.as_f64()), Some(0.0));
        assert_eq!(revision(&conn).expect("revision"), before);
    }

    #[test]
    fn create_if_absent_aborts_on_existing_id() {
        let conn = open_memory();
        let mut first = Batch::new();
        first.create_if_absent(Collection::DailyDeductions, "c1_2026-10-14", fields(json!({ "courseId": "c1" })));
        first.commit(&conn).expect("first marker");

        let mut second = Batch::new();
        second.create_if_absent(Collection::DailyDeductions, "c1_2026-10-14", fields(json!({ "courseId": "c1" })));
        second.create(Collection::Finance, fields(json!({ "amount": "-1" })));
        let res = second.commit(&conn);
        assert!(matches!(res, Err(StoreError::AlreadyExists { .. })));
        assert!(list(&conn, Collection::Finance).expect("list").is_empty());
    }

    #[test]
    fn increment_is_relative_and_keeps_integers() {
        let conn = open_memory();
        let sid = create(&conn, Collection::Students, fields(json!({ "name": "Ali" }))).expect("create");
        let mut batch = Batch::new();
        batch.increment(Collection::Students, &sid, "balance", -25000.0);
        batch.commit(&conn).expect("commit");
        let mut batch = Batch::new();
        batch.increment(Collection::Students, &sid, "balance", 5000.0);
        batch.commit(&conn).expect("commit");

        let doc = get(&conn, Collection::Students, &sid).expect("get").expect("exists");
        assert_eq!(doc.fields.get("balance").and_then(|v| v.as_i64()), Some(-20000));
    }

    #[test]
    fn server_timestamp_is_resolved_and_monotonic() {
        let conn = open_memory();
        let a = create(&conn, Collection::Activities, fields(json!({ "createdAt": server_timestamp() })))
            .expect("create a");
        let b = create(&conn, Collection::Activities, fields(json!({ "createdAt": server_timestamp() })))
            .expect("create b");
        let ta = get(&conn, Collection::Activities, &a).unwrap().unwrap().fields["createdAt"].as_i64().unwrap();
        let tb = get(&conn, Collection::Activities, &b).unwrap().unwrap().fields["createdAt"].as_i64().unwrap();
        assert!(tb > ta);
    }

    #[test]
    fn attendance_unique_index_rejects_second_record_for_same_day() {
        let conn = open_memory();
        create(&conn, Collection::Attendance, fields(json!({ "courseId": "c1", "date": "2026-10-14" })))
            .expect("first");
        let res = create(&conn, Collection::Attendance, fields(json!({ "courseId": "c1", "date": "2026-10-14" })));
        assert!(matches!(res, Err(StoreError::Conflict { .. })));
        create(&conn, Collection::Attendance, fields(json!({ "courseId": "c1", "date": "2026-10-15" })))
            .expect("other day is fine");
    }
}
