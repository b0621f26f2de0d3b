//! Statistics generation from the result store
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{FailureKind, FailureSummary, RecordStore, RunRecord, StorageResult};
use std::fmt::Write;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Number of distinct records (by content hash)
    pub total_records: u64,

    /// Number of terminal fetch failures across all runs
    pub total_failures: u64,

    /// Failures grouped by kind and status code, largest first
    pub failure_summary: Vec<FailureSummary>,

    /// Most recently started run, if any
    pub latest_run: Option<RunRecord>,
}

impl CrawlStatistics {
    /// Number of failures of the given kind
    pub fn failures_of(&self, kind: FailureKind) -> u64 {
        self.failure_summary
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.count)
            .sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The result store to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(store: &dyn RecordStore) -> StorageResult<CrawlStatistics> {
    Ok(CrawlStatistics {
        total_records: store.count_records()?,
        total_failures: store.count_failures()?,
        failure_summary: store.failure_summary()?,
        latest_run: store.latest_run()?,
    })
}

/// Renders statistics as the text report printed by the CLI
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();

    // writing to a String cannot fail
    let _ = writeln!(out, "=== Crawl Statistics ===\n");

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Records: {}", stats.total_records);
    let _ = writeln!(
        out,
        "  Failures: {} ({} transient, {} permanent)",
        stats.total_failures,
        stats.failures_of(FailureKind::Transient),
        stats.failures_of(FailureKind::Permanent)
    );
    let _ = writeln!(out);

    if let Some(run) = &stats.latest_run {
        let _ = writeln!(out, "Latest Run:");
        let _ = writeln!(out, "  ID: {}", run.id);
        let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
        let _ = writeln!(out, "  Started: {}", run.started_at.to_rfc3339());
        if let Some(finished) = run.finished_at {
            let _ = writeln!(
                out,
                "  Finished: {} ({}s)",
                finished.to_rfc3339(),
                (finished - run.started_at).num_seconds()
            );
        }
        let _ = writeln!(out, "  Pages fetched: {}", run.pages_fetched);
        let _ = writeln!(out, "  Failures: {}", run.failures);
        let _ = writeln!(out);
    }

    if !stats.failure_summary.is_empty() {
        let _ = writeln!(out, "Failure Summary:");
        for summary in &stats.failure_summary {
            let status = summary
                .status_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "  {:<9} {:>4}: {}",
                summary.kind.to_db_string(),
                status,
                summary.count
            );
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FailureRecord, Record, RunStatus, SqliteStore};
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_load_statistics() {
        let store = SqliteStore::new_in_memory().unwrap();
        let run_id = store.create_run("hash").unwrap();
        store
            .upsert(&Record::new("https://example.com/", "abc", BTreeMap::new(), Utc::now()))
            .unwrap();
        for (status, kind) in [
            (Some(404), FailureKind::Permanent),
            (Some(404), FailureKind::Permanent),
            (None, FailureKind::Transient),
        ] {
            store
                .record_failure(&FailureRecord {
                    run_id: Some(run_id),
                    url: "https://example.com/x".to_string(),
                    host: "example.com".to_string(),
                    kind,
                    status_code: status,
                    message: "failed".to_string(),
                    retry_count: 0,
                    failed_at: Utc::now(),
                })
                .unwrap();
        }
        store.finish_run(run_id, RunStatus::Completed, 4, 3).unwrap();

        let stats = load_statistics(&store).unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.failures_of(FailureKind::Permanent), 2);
        assert_eq!(stats.failures_of(FailureKind::Transient), 1);
        assert_eq!(stats.latest_run.as_ref().unwrap().status, RunStatus::Completed);

        let report = format_statistics(&stats);
        assert!(report.contains("Records: 1"));
        assert!(report.contains("Status: completed"));
        assert!(report.contains("404"));
    }

    #[test]
    fn test_empty_store_statistics() {
        let store = SqliteStore::new_in_memory().unwrap();
        let stats = load_statistics(&store).unwrap();
        assert_eq!(stats.total_records, 0);
        assert!(stats.latest_run.is_none());
        assert!(!format_statistics(&stats).contains("Latest Run"));
    }
}
