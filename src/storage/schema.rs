//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Driftnet result store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_fetched INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0
);

-- One row per distinct content hash
CREATE TABLE IF NOT EXISTS records (
    content_hash TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    fields TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_last_seen ON records(last_seen);

-- Every URL a record's content was seen at
CREATE TABLE IF NOT EXISTS record_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL REFERENCES records(content_hash) ON DELETE CASCADE,
    url TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    UNIQUE(content_hash, url)
);

CREATE INDEX IF NOT EXISTS idx_record_sources_url ON record_sources(url);

-- Flattened field values for equality filters
CREATE TABLE IF NOT EXISTS record_fields (
    content_hash TEXT NOT NULL REFERENCES records(content_hash) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (content_hash, name, value)
);

CREATE INDEX IF NOT EXISTS idx_record_fields_lookup ON record_fields(name, value);

-- Terminal fetch failures
CREATE TABLE IF NOT EXISTS fetch_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER REFERENCES runs(id),
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    kind TEXT NOT NULL,
    status_code INTEGER,
    message TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fetch_failures_failed_at ON fetch_failures(failed_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
