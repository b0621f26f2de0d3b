//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordStore trait.
//! Timestamps are stored as RFC 3339 strings with microsecond precision and a `Z`
//! suffix, so lexical order matches time order.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{
    FailureKind, FailureRecord, FailureSummary, Record, RecordQuery, RunRecord, RunStatus,
    UpsertOutcome,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before reporting it busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite result store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_sources(conn: &Connection, content_hash: &str) -> StorageResult<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT url FROM record_sources WHERE content_hash = ?1 ORDER BY id")?;
        let urls = stmt
            .query_map(params![content_hash], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn write_fields(
        conn: &Connection,
        content_hash: &str,
        fields: &BTreeMap<String, serde_json::Value>,
    ) -> StorageResult<()> {
        conn.execute(
            "DELETE FROM record_fields WHERE content_hash = ?1",
            params![content_hash],
        )?;

        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO record_fields (content_hash, name, value) VALUES (?1, ?2, ?3)",
        )?;
        for (name, value) in fields {
            for scalar in field_values(value) {
                stmt.execute(params![content_hash, name, scalar])?;
            }
        }
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    // ===== Records =====

    fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT fields, first_seen, last_seen FROM records WHERE content_hash = ?1",
                params![record.content_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        parse_timestamp(row, 1)?,
                        parse_timestamp(row, 2)?,
                    ))
                },
            )
            .optional()?;

        let outcome = match existing {
            Some((fields_json, first_seen, last_seen)) => {
                let mut fields: BTreeMap<String, serde_json::Value> =
                    serde_json::from_str(&fields_json)?;
                fields.extend(record.extracted_fields.clone());

                tx.execute(
                    "UPDATE records SET fields = ?1, first_seen = ?2, last_seen = ?3
                     WHERE content_hash = ?4",
                    params![
                        serde_json::to_string(&fields)?,
                        format_timestamp(first_seen.min(record.first_seen)),
                        format_timestamp(last_seen.max(record.last_seen)),
                        record.content_hash
                    ],
                )?;
                Self::write_fields(&tx, &record.content_hash, &fields)?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO records (content_hash, source_url, fields, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.content_hash,
                        record.source_url,
                        serde_json::to_string(&record.extracted_fields)?,
                        format_timestamp(record.first_seen),
                        format_timestamp(record.last_seen)
                    ],
                )?;
                Self::write_fields(&tx, &record.content_hash, &record.extracted_fields)?;
                UpsertOutcome::Inserted
            }
        };

        for url in record.source_urls.iter().chain(std::iter::once(&record.source_url)) {
            tx.execute(
                "INSERT OR IGNORE INTO record_sources (content_hash, url, first_seen)
                 VALUES (?1, ?2, ?3)",
                params![record.content_hash, url, format_timestamp(record.last_seen)],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn query(&self, query: &RecordQuery) -> StorageResult<Vec<Record>> {
        let mut sql = String::from(
            "SELECT r.content_hash, r.source_url, r.fields, r.first_seen, r.last_seen
             FROM records r WHERE 1 = 1",
        );
        let mut args: Vec<Value> = Vec::new();

        for (name, value) in &query.fields {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM record_fields f
                   WHERE f.content_hash = r.content_hash AND f.name = ? AND f.value = ?)",
            );
            args.push(Value::Text(name.clone()));
            args.push(Value::Text(value.clone()));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND r.last_seen >= ?");
            args.push(Value::Text(format_timestamp(since)));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND r.last_seen <= ?");
            args.push(Value::Text(format_timestamp(until)));
        }
        if let Some(url) = &query.url {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM record_sources s
                   WHERE s.content_hash = r.content_hash AND s.url = ?)",
            );
            args.push(Value::Text(url.clone()));
        }
        sql.push_str(" ORDER BY r.last_seen DESC, r.content_hash");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    parse_timestamp(row, 3)?,
                    parse_timestamp(row, 4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(content_hash, source_url, fields, first_seen, last_seen)| -> StorageResult<Record> {
                Ok(Record {
                    source_urls: Self::load_sources(&conn, &content_hash)?,
                    extracted_fields: serde_json::from_str(&fields)?,
                    source_url,
                    content_hash,
                    first_seen,
                    last_seen,
                })
            })
            .collect()
    }

    fn get(&self, content_hash: &str) -> StorageResult<Option<Record>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT source_url, fields, first_seen, last_seen FROM records
                 WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        parse_timestamp(row, 2)?,
                        parse_timestamp(row, 3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((source_url, fields, first_seen, last_seen)) => Ok(Some(Record {
                source_urls: Self::load_sources(&conn, content_hash)?,
                extracted_fields: serde_json::from_str(&fields)?,
                source_url,
                content_hash: content_hash.to_string(),
                first_seen,
                last_seen,
            })),
            None => Ok(None),
        }
    }

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Failures =====

    fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO fetch_failures
             (run_id, url, host, kind, status_code, message, retry_count, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                failure.run_id,
                failure.url,
                failure.host,
                failure.kind.to_db_string(),
                failure.status_code,
                failure.message,
                failure.retry_count,
                format_timestamp(failure.failed_at)
            ],
        )?;
        Ok(())
    }

    fn failures(&self, limit: usize) -> StorageResult<Vec<FailureRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, url, host, kind, status_code, message, retry_count, failed_at
             FROM fetch_failures ORDER BY failed_at DESC, id DESC LIMIT ?1",
        )?;

        let failures = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(FailureRecord {
                    run_id: row.get(0)?,
                    url: row.get(1)?,
                    host: row.get(2)?,
                    kind: FailureKind::from_db_string(&row.get::<_, String>(3)?)
                        .unwrap_or(FailureKind::Permanent),
                    status_code: row.get(4)?,
                    message: row.get(5)?,
                    retry_count: row.get(6)?,
                    failed_at: parse_timestamp(row, 7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(failures)
    }

    fn count_failures(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM fetch_failures", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn failure_summary(&self) -> StorageResult<Vec<FailureSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, status_code, COUNT(*) AS n FROM fetch_failures
             GROUP BY kind, status_code ORDER BY n DESC, kind, status_code",
        )?;

        let summary = stmt
            .query_map([], |row| {
                Ok(FailureSummary {
                    kind: FailureKind::from_db_string(&row.get::<_, String>(0)?)
                        .unwrap_or(FailureKind::Permanent),
                    status_code: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summary)
    }

    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        pages_fetched: u64,
        failures: u64,
    ) -> StorageResult<()> {
        let updated = self.conn.lock().execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, pages_fetched = ?3, failures = ?4
             WHERE id = ?5",
            params![
                status.to_db_string(),
                format_timestamp(Utc::now()),
                pages_fetched as i64,
                failures as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status, pages_fetched, failures
                 FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .lock()
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status, pages_fetched, failures
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status, pages_fetched, failures
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
                run_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    // ===== Health =====

    fn ping(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let finished_at: Option<String> = row.get(2)?;
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: parse_timestamp(row, 1)?,
        finished_at: finished_at
            .map(|s| parse_timestamp_str(&s, 2))
            .transpose()?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        pages_fetched: row.get::<_, i64>(5)? as u64,
        failures: row.get::<_, i64>(6)? as u64,
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp_str(&raw, idx)
}

fn parse_timestamp_str(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Flattens a field value into the strings an equality filter can match
fn field_values(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(field_values).collect(),
        other => vec![other.to_string()],
    }
}
