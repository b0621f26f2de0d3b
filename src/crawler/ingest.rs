//! Ingestion stage: parse fetched pages, propose links, write the result store
//!
//! A single task owns the receiving end of the worker channel. Store writes that fail
//! because the store is unavailable stay buffered in order and are retried; while the
//! buffer is non-empty the task stops receiving, so the bounded channel pushes back on
//! the workers. Once the crawl is cancelled it keeps receiving regardless, so workers
//! can always finish.

use crate::config::ScopeConfig;
use crate::crawler::frontier::Frontier;
use crate::crawler::parser::{parse, ExtractionSchema};
use crate::crawler::pool::{CrawlCounters, WorkerOutput};
use crate::storage::{FailureRecord, Record, RecordStore, StorageResult};
use crate::url::classify_host;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// A store write waiting to be committed
#[derive(Debug, Clone)]
enum PendingWrite {
    Record(Record),
    Failure(FailureRecord),
}

impl PendingWrite {
    fn apply(&self, store: &dyn RecordStore) -> StorageResult<()> {
        match self {
            Self::Record(record) => store.upsert(record).map(|_| ()),
            Self::Failure(failure) => store.record_failure(failure),
        }
    }
}

/// Shared state of the ingestion task
pub struct IngestContext {
    pub frontier: Arc<Frontier>,
    pub store: Arc<dyn RecordStore>,
    pub schema: Arc<ExtractionSchema>,
    pub scope: ScopeConfig,
    pub max_depth: u32,
    pub counters: Arc<CrawlCounters>,
    pub cancel: CancellationToken,
    /// Pause between attempts while the store is unavailable
    pub retry_interval: Duration,
    /// Flush attempts made after the channel closes
    pub shutdown_attempts: u32,
}

/// Runs until every sender is dropped, then flushes what is still buffered
pub async fn run_ingest(ctx: IngestContext, mut rx: mpsc::Receiver<WorkerOutput>) {
    let mut pending: VecDeque<PendingWrite> = VecDeque::new();

    loop {
        if !flush(&ctx, &mut pending) && !ctx.cancel.is_cancelled() {
            tokio::select! {
                _ = tokio::time::sleep(ctx.retry_interval) => {}
                _ = ctx.cancel.cancelled() => {}
            }
            continue;
        }

        match rx.recv().await {
            Some(output) => handle_output(&ctx, output, &mut pending),
            None => break,
        }
    }

    for attempt in 1..=ctx.shutdown_attempts {
        if flush(&ctx, &mut pending) {
            break;
        }
        warn!(
            "Store unavailable at shutdown, {} writes buffered (attempt {} of {})",
            pending.len(),
            attempt,
            ctx.shutdown_attempts
        );
        tokio::time::sleep(ctx.retry_interval).await;
    }

    if !pending.is_empty() {
        error!("Dropping {} buffered writes, store still unavailable", pending.len());
    }
    debug!("Ingestion finished");
}

/// Processes one worker output; the target is completed in the frontier before returning
fn handle_output(ctx: &IngestContext, output: WorkerOutput, pending: &mut VecDeque<PendingWrite>) {
    match output {
        WorkerOutput::Fetched(result) => {
            let page = parse(&result, &ctx.schema);

            if let Some(issue) = &page.issue {
                warn!("No record from {}: {}", result.target.url, issue);
                CrawlCounters::bump(&ctx.counters.extraction_issues);
            }

            let mut proposed = 0usize;
            for link in page.links {
                if link.depth > ctx.max_depth {
                    trace!("Skipping {} beyond max depth", link.url);
                    continue;
                }
                let classification = classify_host(&link.host, &ctx.scope);
                if !classification.should_crawl() {
                    trace!("Skipping {} ({:?})", link.url, classification);
                    continue;
                }
                if ctx.frontier.enqueue(link) {
                    proposed += 1;
                }
            }
            debug!("{}: {} new links queued", result.target.url, proposed);

            ctx.frontier.complete(result.target.key());
            if let Some(record) = page.record {
                pending.push_back(PendingWrite::Record(record));
            }
        }
        WorkerOutput::Failed(failure) => {
            info!(
                "Giving up on {} after {} retries: {}",
                failure.url, failure.retry_count, failure.message
            );
            CrawlCounters::bump(&ctx.counters.failures);
            ctx.frontier.complete(&failure.url);
            pending.push_back(PendingWrite::Failure(failure));
        }
    }
}

/// Writes buffered entries in order; returns true when the buffer is empty
///
/// Stops at the first unavailable error and keeps that entry at the front. Entries that
/// fail for any other reason cannot succeed on retry and are dropped.
fn flush(ctx: &IngestContext, pending: &mut VecDeque<PendingWrite>) -> bool {
    while let Some(write) = pending.pop_front() {
        match write.apply(ctx.store.as_ref()) {
            Ok(()) => {
                if matches!(write, PendingWrite::Record(_)) {
                    CrawlCounters::bump(&ctx.counters.records_written);
                }
            }
            Err(e) if e.is_unavailable() => {
                warn!("Result store unavailable, pausing ingestion: {}", e);
                pending.push_front(write);
                return false;
            }
            Err(e) => {
                error!("Failed to write to result store: {}", e);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::crawler::fetcher::FetchResult;
    use crate::crawler::frontier::FetchTarget;
    use crate::storage::{
        FailureKind, FailureSummary, RecordQuery, RunRecord, RunStatus, SqliteStore,
        StorageError, UpsertOutcome,
    };
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every write with `Unavailable` until `outage` attempts have been used up
    struct FlakyStore {
        inner: SqliteStore,
        outage: AtomicU32,
    }

    impl FlakyStore {
        fn check(&self) -> StorageResult<()> {
            let left = self.outage.load(Ordering::SeqCst);
            if left > 0 {
                self.outage.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("database is locked".to_string()));
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyStore {
        fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome> {
            self.check()?;
            self.inner.upsert(record)
        }
        fn query(&self, query: &RecordQuery) -> StorageResult<Vec<Record>> {
            self.inner.query(query)
        }
        fn get(&self, content_hash: &str) -> StorageResult<Option<Record>> {
            self.inner.get(content_hash)
        }
        fn count_records(&self) -> StorageResult<u64> {
            self.inner.count_records()
        }
        fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()> {
            self.check()?;
            self.inner.record_failure(failure)
        }
        fn failures(&self, limit: usize) -> StorageResult<Vec<FailureRecord>> {
            self.inner.failures(limit)
        }
        fn count_failures(&self) -> StorageResult<u64> {
            self.inner.count_failures()
        }
        fn failure_summary(&self) -> StorageResult<Vec<FailureSummary>> {
            self.inner.failure_summary()
        }
        fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
            self.inner.create_run(config_hash)
        }
        fn finish_run(
            &self,
            run_id: i64,
            status: RunStatus,
            pages_fetched: u64,
            failures: u64,
        ) -> StorageResult<()> {
            self.inner.finish_run(run_id, status, pages_fetched, failures)
        }
        fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
            self.inner.get_run(run_id)
        }
        fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
            self.inner.latest_run()
        }
        fn runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
            self.inner.runs(limit)
        }
        fn ping(&self) -> StorageResult<()> {
            self.inner.ping()
        }
    }

    fn context(store: Arc<dyn RecordStore>, frontier: Arc<Frontier>) -> IngestContext {
        IngestContext {
            frontier,
            store,
            schema: Arc::new(ExtractionSchema::from_config(&ExtractConfig::default()).unwrap()),
            scope: ScopeConfig::default(),
            max_depth: 1,
            counters: Arc::new(CrawlCounters::default()),
            cancel: CancellationToken::new(),
            retry_interval: Duration::from_millis(10),
            shutdown_attempts: 3,
        }
    }

    /// Dequeues a seed so it is in flight, then builds a successful fetch of it
    fn in_flight_result(frontier: &Frontier, url: &str, body: &str) -> FetchResult {
        frontier.enqueue(FetchTarget::seed(url, 10).unwrap());
        let target = frontier.dequeue(|_| true).unwrap();
        FetchResult {
            final_url: target.url.clone(),
            target,
            status_code: Some(200),
            content_type: Some("text/html".to_string()),
            body: Some(body.to_string()),
            fetched_at: Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_record_and_queues_links() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let frontier = Arc::new(Frontier::new(100));
        let ctx = context(store.clone(), frontier.clone());
        let counters = ctx.counters.clone();

        let result = in_flight_result(
            &frontier,
            "https://example.com/",
            r#"<html><head><title>Home</title></head><body><a href="/next">n</a></body></html>"#,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(WorkerOutput::Fetched(result)).await.unwrap();
        drop(tx);
        run_ingest(ctx, rx).await;

        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(CrawlCounters::get(&counters.records_written), 1);
        assert_eq!(frontier.in_flight_len(), 0);
        assert!(frontier.contains("https://example.com/next"));
    }

    #[tokio::test]
    async fn test_malformed_page_leaves_store_and_frontier_unchanged() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let frontier = Arc::new(Frontier::new(100));
        let ctx = context(store.clone(), frontier.clone());

        let result = in_flight_result(&frontier, "https://example.com/", "plain text, no markup");

        let (tx, rx) = mpsc::channel(4);
        tx.send(WorkerOutput::Fetched(result)).await.unwrap();
        drop(tx);
        run_ingest(ctx, rx).await;

        assert_eq!(store.count_records().unwrap(), 0);
        assert!(frontier.is_empty());
        assert!(frontier.is_quiescent());
    }

    #[tokio::test]
    async fn test_links_beyond_max_depth_are_not_queued() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let frontier = Arc::new(Frontier::new(100));
        let mut ctx = context(store, frontier.clone());
        ctx.max_depth = 0;

        let result = in_flight_result(
            &frontier,
            "https://example.com/",
            r#"<html><head><title>t</title></head><body><a href="/deeper">d</a></body></html>"#,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(WorkerOutput::Fetched(result)).await.unwrap();
        drop(tx);
        run_ingest(ctx, rx).await;

        assert!(frontier.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_survives_store_outage() {
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::new_in_memory().unwrap(),
            outage: AtomicU32::new(3),
        });
        let frontier = Arc::new(Frontier::new(100));
        let ctx = context(store.clone(), frontier.clone());

        let result = in_flight_result(
            &frontier,
            "https://example.com/",
            "<html><head><title>Buffered</title></head></html>",
        );
        frontier.enqueue(FetchTarget::seed("https://example.com/gone", 10).unwrap());
        let gone = frontier.dequeue(|_| true).unwrap();

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_ingest(ctx, rx));

        tx.send(WorkerOutput::Fetched(result)).await.unwrap();
        tx.send(WorkerOutput::Failed(FailureRecord {
            run_id: None,
            url: gone.key().to_string(),
            host: gone.host.clone(),
            kind: FailureKind::Permanent,
            status_code: Some(404),
            message: "HTTP 404".to_string(),
            retry_count: 0,
            failed_at: Utc::now(),
        }))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(store.count_failures().unwrap(), 1);
        assert_eq!(store.outage.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permanent_outage_drops_after_bounded_attempts() {
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::new_in_memory().unwrap(),
            outage: AtomicU32::new(u32::MAX),
        });
        let frontier = Arc::new(Frontier::new(100));
        let ctx = context(store.clone(), frontier.clone());
        ctx.cancel.cancel();

        let result = in_flight_result(
            &frontier,
            "https://example.com/",
            "<html><head><title>Lost</title></head></html>",
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(WorkerOutput::Fetched(result)).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), run_ingest(ctx, rx))
            .await
            .expect("ingestion must finish once cancelled");
        assert_eq!(store.inner.count_records().unwrap(), 0);
        assert!(frontier.is_quiescent());
    }
}
