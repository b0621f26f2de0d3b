//! Storage traits and error types
//!
//! This module defines the trait interface for the result store and
//! associated error types.

use crate::storage::{
    FailureRecord, FailureSummary, Record, RecordQuery, RunRecord, RunStatus, UpsertOutcome,
};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database cannot currently be used; callers may retry later
    #[error("Result store unavailable: {0}")]
    Unavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// True for errors caused by an unusable database rather than bad input
    ///
    /// Busy, locked, unopenable, I/O, read-only and full databases all count.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for result store implementations
///
/// Every method takes `&self`; implementations serialize access internally so the store
/// can be shared as `Arc<dyn RecordStore>` between the ingestion task and the API.
pub trait RecordStore: Send + Sync {
    // ===== Records =====

    /// Inserts a record, or merges it into the record with the same content hash
    ///
    /// On merge: `last_seen` only moves forward, new field values overwrite old ones,
    /// and the record's URL joins the source list. Runs as one transaction.
    ///
    /// # Arguments
    ///
    /// * `record` - Freshly extracted record, keyed by its content hash
    ///
    /// # Returns
    ///
    /// * `Ok(UpsertOutcome::Inserted)` - No record had this content hash
    /// * `Ok(UpsertOutcome::Updated)` - An existing record was merged
    /// * `Err(StorageError)` - Nothing was written
    fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome>;

    /// Returns records matching every condition, newest `last_seen` first
    fn query(&self, query: &RecordQuery) -> StorageResult<Vec<Record>>;

    /// Gets a record by content hash
    fn get(&self, content_hash: &str) -> StorageResult<Option<Record>>;

    fn count_records(&self) -> StorageResult<u64>;

    // ===== Failures =====

    fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()>;

    /// Most recent terminal failures first
    fn failures(&self, limit: usize) -> StorageResult<Vec<FailureRecord>>;

    fn count_failures(&self) -> StorageResult<u64>;

    /// Failure counts grouped by kind and status code, largest first
    fn failure_summary(&self) -> StorageResult<Vec<FailureSummary>>;

    // ===== Run Management =====

    /// Opens a new run in the `running` status and returns its ID
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Closes a run with its final status and counters
    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        pages_fetched: u64,
        failures: u64,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Run history, newest first
    fn runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Health =====

    /// Cheap round trip proving the store is usable
    fn ping(&self) -> StorageResult<()>;
}
