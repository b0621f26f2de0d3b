//! Storage module for the durable result store
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Content-hash deduplicated record upserts and filtered queries
//! - Terminal fetch failure tracking
//! - Crawl run bookkeeping

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Opens (creating if needed) the SQLite result store at `path`
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// An extracted record, deduplicated by content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// URL the content was first extracted from
    pub source_url: String,

    /// Every URL this content has been seen at, oldest first
    pub source_urls: Vec<String>,

    pub content_hash: String,

    pub extracted_fields: BTreeMap<String, serde_json::Value>,

    pub first_seen: DateTime<Utc>,

    pub last_seen: DateTime<Utc>,
}

impl Record {
    /// Creates a record seen once, at `url`
    pub fn new(
        url: impl Into<String>,
        content_hash: impl Into<String>,
        extracted_fields: BTreeMap<String, serde_json::Value>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        Self {
            source_urls: vec![url.clone()],
            source_url: url,
            content_hash: content_hash.into(),
            extracted_fields,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Record query keys with a fixed meaning; no extracted field may use these names
pub const RESERVED_QUERY_KEYS: &[&str] = &["since", "until", "url", "limit"];

/// Read-only record filter; every given condition must hold
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Field name → required value (matches any element of a multi-valued field)
    pub fields: BTreeMap<String, String>,

    /// Inclusive lower bound on `last_seen`
    pub since: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `last_seen`
    pub until: Option<DateTime<Utc>>,

    /// Only records seen at this URL
    pub url: Option<String>,

    pub limit: Option<usize>,
}

/// Transient vs permanent terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// A target that will not be fetched again in this crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub run_id: Option<i64>,
    pub url: String,
    pub host: String,
    pub kind: FailureKind,
    pub status_code: Option<u16>,
    pub message: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

/// Failure count grouped by kind and status code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub kind: FailureKind,
    pub status_code: Option<u16>,
    pub count: u64,
}

/// Represents a crawl run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub status: RunStatus,
    pub pages_fetched: u64,
    pub failures: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
