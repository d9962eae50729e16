//! Time-series store.
//!
//! Readings are appended to one SQLite table per schema version: an
//! `id INTEGER PRIMARY KEY AUTOINCREMENT` surrogate key, one column per point in
//! schema order and a `timestamp` text column (`YYYY-MM-DD HH:MM:SS`, local time).
//! The log is append-only; nothing here updates or deletes rows.
//!
//! A connection is opened per operation on the blocking pool, so the store holds no
//! shared mutable handle. Each operation is bounded by the configured timeout: SQLite
//! waits on locks for half of it, and an outer `tokio::time::timeout` covers the rest.
//! Appends take the write lock up front so concurrent writers queue on the busy
//! handler instead of failing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::error::AcqError;
use crate::reading::{now_timestamp, PointValue, Reading, RecordId, TIMESTAMP_FORMAT};
use crate::schema::{is_identifier, DecodeType, PointSchema};

pub struct TimeSeriesStore {
    db_path: PathBuf,
    table: String,
    schema: Arc<PointSchema>,
    op_timeout: Duration,
}

impl TimeSeriesStore {
    /// # Errors
    ///
    /// Returns `AcqError::Config` when `table` is not a plain SQL identifier.
    pub fn new(
        db_path: impl Into<PathBuf>,
        table: impl Into<String>,
        schema: Arc<PointSchema>,
        op_timeout: Duration,
    ) -> Result<Self, AcqError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(AcqError::Config(format!("invalid table name: {table:?}")));
        }
        Ok(Self {
            db_path: db_path.into(),
            table,
            schema,
            op_timeout,
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn schema(&self) -> &PointSchema {
        &self.schema
    }

    /// Create the table for the active schema if it does not exist yet.
    ///
    /// # Errors
    ///
    /// `AcqError::StorageUnavailable` on SQLite failure or timeout.
    pub async fn create_table(&self) -> Result<(), AcqError> {
        let sql = self.create_table_sql();
        self.run("create_table", move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    /// Append one reading and return its record id.
    ///
    /// # Errors
    ///
    /// `AcqError::SchemaMismatch` when the reading's points or the table's columns
    /// differ from the active schema (the table is left untouched);
    /// `AcqError::StorageUnavailable` on SQLite failure or timeout.
    pub async fn append(&self, reading: &Reading) -> Result<RecordId, AcqError> {
        self.check_reading(reading)?;

        let mut params: Vec<SqlValue> = Vec::with_capacity(self.schema.len() + 1);
        for point in self.schema.all() {
            let value = reading
                .get(&point.name)
                .ok_or_else(|| AcqError::SchemaMismatch(format!("missing {}", point.name)))?;
            params.push(to_sql(value));
        }
        params.push(SqlValue::Text(
            reading.timestamp().format(TIMESTAMP_FORMAT).to_string(),
        ));

        let sql = self.insert_sql();
        let expected = self.expected_columns();
        let table = self.table.clone();
        let id = self
            .run("append", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                check_table_columns(&tx, &table, &expected)?;
                tx.execute(&sql, params_from_iter(params))?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(RecordId(id))
            })
            .await?;
        debug!(table = %self.table, record_id = %id, "reading appended");
        Ok(id)
    }

    /// The record with the highest id, if any.
    ///
    /// # Errors
    ///
    /// `AcqError::StorageUnavailable` on SQLite failure or timeout,
    /// `AcqError::Decode` when a stored row cannot be mapped back onto the schema.
    pub async fn latest(&self) -> Result<Option<Reading>, AcqError> {
        let sql = format!("{} ORDER BY id DESC LIMIT 1", self.select_sql());
        let schema = Arc::clone(&self.schema);
        self.run("latest", move |conn| {
            let row = conn
                .query_row(&sql, [], |row| Ok(row_to_reading(row, &schema)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    /// Records stamped within `[now - window, now]`, newest first.
    ///
    /// # Errors
    ///
    /// Same as [`TimeSeriesStore::latest`].
    pub async fn history(&self, window: Duration) -> Result<Vec<Reading>, AcqError> {
        let now = now_timestamp();
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(NaiveDateTime::MIN);
        let bounds = [
            since.format(TIMESTAMP_FORMAT).to_string(),
            now.format(TIMESTAMP_FORMAT).to_string(),
        ];
        let sql = format!(
            "{} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp DESC, id DESC",
            self.select_sql()
        );
        let schema = Arc::clone(&self.schema);
        self.run("history", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(bounds, |row| Ok(row_to_reading(row, &schema)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
        .await
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// `AcqError::StorageUnavailable` on SQLite failure or timeout.
    pub async fn count(&self) -> Result<u64, AcqError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        self.run("count", move |conn| {
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
        .await
    }

    fn check_reading(&self, reading: &Reading) -> Result<(), AcqError> {
        let expected: BTreeSet<&str> = self.schema.column_names().collect();
        let got: BTreeSet<&str> = reading.names().collect();
        if expected == got {
            return Ok(());
        }
        let missing: Vec<&str> = expected.difference(&got).copied().collect();
        let extra: Vec<&str> = got.difference(&expected).copied().collect();
        Err(AcqError::SchemaMismatch(format!(
            "reading does not match schema v{}: missing {missing:?}, unexpected {extra:?}",
            self.schema.version()
        )))
    }

    fn expected_columns(&self) -> Vec<String> {
        std::iter::once("id")
            .chain(self.schema.column_names())
            .chain(std::iter::once("timestamp"))
            .map(str::to_string)
            .collect()
    }

    fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .schema
            .all()
            .iter()
            .map(|p| format!("{} {} NOT NULL", p.name, p.decode.sql_type()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {}, timestamp TEXT NOT NULL);",
            self.table,
            columns.join(", ")
        )
    }

    fn insert_sql(&self) -> String {
        let names: Vec<&str> = self.schema.column_names().collect();
        let placeholders: Vec<String> = (1..=names.len() + 1).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}, timestamp) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    fn select_sql(&self) -> String {
        let names: Vec<&str> = self.schema.column_names().collect();
        format!("SELECT {}, timestamp FROM {}", names.join(", "), self.table)
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, AcqError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AcqError> + Send + 'static,
    {
        let path = self.db_path.clone();
        // lock waits end well before the outer timeout, so a reported failure never
        // hides a commit
        let busy = self.op_timeout / 2;
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(busy)?;
            f(&mut conn)
        });
        match tokio::time::timeout(self.op_timeout, task).await {
            Err(_) => Err(AcqError::StorageUnavailable(format!("{op} timed out"))),
            Ok(Err(join)) => Err(AcqError::StorageUnavailable(format!("{op} task failed: {join}"))),
            Ok(Ok(res)) => res,
        }
    }
}

fn to_sql(value: PointValue) -> SqlValue {
    match value {
        PointValue::Float(v) => SqlValue::Real(f64::from(v)),
        PointValue::UInt(v) => SqlValue::Integer(i64::from(v)),
        PointValue::Bool(v) => SqlValue::Integer(i64::from(v)),
    }
}

fn from_sql(name: &str, decode: DecodeType, value: SqlValue) -> Result<PointValue, AcqError> {
    let bad = |v: &SqlValue| AcqError::Decode(format!("stored {name} is not a {decode}: {v:?}"));
    match (decode, &value) {
        #[allow(clippy::cast_possible_truncation)]
        (DecodeType::Float32BE, SqlValue::Real(v)) => Ok(PointValue::Float(*v as f32)),
        #[allow(clippy::cast_precision_loss)]
        (DecodeType::Float32BE, SqlValue::Integer(v)) => Ok(PointValue::Float(*v as f32)),
        (DecodeType::UInt16, SqlValue::Integer(v)) => {
            u16::try_from(*v).map(PointValue::UInt).map_err(|_| bad(&value))
        }
        (DecodeType::Bool, SqlValue::Integer(v)) => Ok(PointValue::Bool(*v != 0)),
        _ => Err(bad(&value)),
    }
}

fn row_to_reading(row: &Row<'_>, schema: &PointSchema) -> Result<Reading, AcqError> {
    let n = schema.len();
    let ts: String = row.get(n)?;
    let timestamp = NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT)
        .map_err(|e| AcqError::Decode(format!("stored timestamp {ts:?}: {e}")))?;
    let mut reading = Reading::new(timestamp);
    for (idx, point) in schema.all().iter().enumerate() {
        let raw: SqlValue = row.get(idx)?;
        reading.insert(point.name.clone(), from_sql(&point.name, point.decode, raw)?);
    }
    Ok(reading)
}

fn check_table_columns(conn: &Connection, table: &str, expected: &[String]) -> Result<(), AcqError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let actual = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if actual.is_empty() {
        return Err(AcqError::StorageUnavailable(format!("table {table} does not exist")));
    }
    let lower = |v: &[String]| v.iter().map(|s| s.to_ascii_lowercase()).collect::<BTreeSet<_>>();
    if lower(&actual) != lower(expected) {
        return Err(AcqError::SchemaMismatch(format!(
            "table {table} has columns {actual:?}, schema expects {expected:?}"
        )));
    }
    Ok(())
}
