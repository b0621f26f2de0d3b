//! Crawl coordinator - lifecycle and orchestration of one crawl at a time
//!
//! The coordinator owns the frontier, the politeness gate, the extraction schema and the
//! HTTP client, and receives the result store as an injected dependency. `start` spawns
//! the fetcher pool, the ingestion task and a supervisor that walks the state machine
//! `Running → Draining → Stopped` once the shared cancellation token fires.

use crate::config::Config;
use crate::crawler::fetcher::build_http_client;
use crate::crawler::frontier::{FetchTarget, Frontier};
use crate::crawler::ingest::{run_ingest, IngestContext};
use crate::crawler::parser::ExtractionSchema;
use crate::crawler::pool::{run_worker, CrawlCounters, WorkerContext, WorkerSettings};
use crate::crawler::politeness::PolitenessGate;
use crate::robots::RobotsCache;
use crate::state::CrawlState;
use crate::storage::{RecordStore, RunStatus, StorageError};
use crate::DriftnetError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between store retries while the store is unavailable
const STORE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Flush attempts after the workers have exited
const SHUTDOWN_FLUSH_ATTEMPTS: u32 = 5;

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub state: CrawlState,
    pub run_id: Option<i64>,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub total_records: u64,
    pub pages_fetched: u64,
    pub failures: u64,
    pub retries: u64,
    pub records_written: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Bookkeeping of the current (or last) crawl
struct RunHandle {
    run_id: i64,
    cancel: CancellationToken,
    counters: Arc<CrawlCounters>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

struct Lifecycle {
    state: CrawlState,
    run: Option<RunHandle>,
}

/// State shared with the supervisor task
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<CrawlState>,
}

impl Shared {
    /// Sets the state and publishes it; the caller holds the lifecycle lock
    fn transition(&self, lifecycle: &mut Lifecycle, next: CrawlState) {
        debug!("Crawl state {} -> {}", lifecycle.state, next);
        lifecycle.state = next;
        self.state_tx.send_replace(next);
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    frontier: Arc<Frontier>,
    gate: Arc<PolitenessGate>,
    store: Arc<dyn RecordStore>,
    schema: Arc<ExtractionSchema>,
    client: Client,
    robots: Arc<RobotsCache>,
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Creates a coordinator from its parts
    pub fn new(
        config: Config,
        config_hash: impl Into<String>,
        store: Arc<dyn RecordStore>,
        gate: PolitenessGate,
        schema: ExtractionSchema,
        client: Client,
    ) -> Self {
        let (state_tx, _) = watch::channel(CrawlState::Idle);
        Self {
            frontier: Arc::new(Frontier::new(config.crawler.frontier_capacity)),
            config: Arc::new(config),
            config_hash: config_hash.into(),
            gate: Arc::new(gate),
            store,
            schema: Arc::new(schema),
            client,
            robots: Arc::new(RobotsCache::new()),
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: CrawlState::Idle,
                    run: None,
                }),
                state_tx,
            }),
        }
    }

    /// Creates a coordinator with the gate, schema and HTTP client built from `config`
    ///
    /// # Errors
    ///
    /// * `DriftnetError::Config` - A selector in the extraction schema does not compile
    /// * `DriftnetError::Reqwest` - The HTTP client cannot be built
    pub fn from_config(
        config: Config,
        store: Arc<dyn RecordStore>,
        config_hash: impl Into<String>,
    ) -> Result<Self, DriftnetError> {
        let schema = ExtractionSchema::from_config(&config.extract)?
            .with_link_priority_step(config.crawler.link_priority_step);
        let client = build_http_client(&config.user_agent, config.crawler.fetch_timeout())?;
        let gate = PolitenessGate::from_config(&config);
        Ok(Self::new(config, config_hash, store, gate, schema, client))
    }

    /// Starts a crawl from Idle or Stopped
    ///
    /// Opens a run in the store, reseeds the frontier and spawns the fetcher pool, the
    /// ingestion task and the supervisor. Must be called from within a Tokio runtime.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlStatus)` - Snapshot taken right after entering Running
    ///
    /// # Errors
    ///
    /// * `DriftnetError::AlreadyRunning` - A crawl is Running or Draining; nothing changes
    /// * `DriftnetError::Storage` - The run could not be opened; the state is unchanged
    pub fn start(&self) -> Result<CrawlStatus, DriftnetError> {
        let mut lifecycle = self.shared.lifecycle.lock();
        if !lifecycle.state.can_start() {
            return Err(DriftnetError::AlreadyRunning {
                state: lifecycle.state,
            });
        }

        let run_id = self.store.create_run(&self.config_hash)?;
        let crawler = &self.config.crawler;

        self.frontier.clear();
        let mut seeded = 0usize;
        for seed in &self.config.seeds {
            match FetchTarget::seed(seed, crawler.seed_priority) {
                Ok(target) => {
                    if self.frontier.enqueue(target) {
                        seeded += 1;
                    }
                }
                Err(e) => warn!("Skipping seed {}: {}", seed, e),
            }
        }

        let cancel = CancellationToken::new();
        let counters = Arc::new(CrawlCounters::default());
        let (tx, rx) = mpsc::channel(crawler.channel_capacity);

        let worker_ctx = Arc::new(WorkerContext {
            frontier: self.frontier.clone(),
            gate: self.gate.clone(),
            client: self.client.clone(),
            robots: self.robots.clone(),
            settings: WorkerSettings {
                fetch_timeout: crawler.fetch_timeout(),
                dequeue_timeout: crawler.dequeue_timeout(),
                max_retries: crawler.max_retries,
                retry_backoff: crawler.retry_backoff(),
                retry_priority_penalty: crawler.retry_priority_penalty,
                stop_when_idle: crawler.stop_when_idle,
                respect_robots_txt: crawler.respect_robots_txt,
                robots_agent: self.config.user_agent.crawler_name.clone(),
                run_id: Some(run_id),
            },
            output: tx,
            cancel: cancel.clone(),
            counters: counters.clone(),
        });

        // the workers hold the only senders, so the channel closes when the last one exits
        let workers: Vec<JoinHandle<()>> = (0..crawler.workers as usize)
            .map(|id| tokio::spawn(run_worker(id, worker_ctx.clone())))
            .collect();
        drop(worker_ctx);

        let ingest = tokio::spawn(run_ingest(
            IngestContext {
                frontier: self.frontier.clone(),
                store: self.store.clone(),
                schema: self.schema.clone(),
                scope: self.config.scope.clone(),
                max_depth: crawler.max_depth,
                counters: counters.clone(),
                cancel: cancel.clone(),
                retry_interval: STORE_RETRY_INTERVAL,
                shutdown_attempts: SHUTDOWN_FLUSH_ATTEMPTS,
            },
            rx,
        ));

        tokio::spawn(supervise(
            self.shared.clone(),
            self.store.clone(),
            SupervisedRun {
                run_id,
                cancel: cancel.clone(),
                counters: counters.clone(),
                workers,
                ingest,
            },
        ));

        lifecycle.run = Some(RunHandle {
            run_id,
            cancel,
            counters,
            started_at: Utc::now(),
            finished_at: None,
        });
        self.shared.transition(&mut lifecycle, CrawlState::Running);

        info!(
            "Started crawl run {} with {} seeds and {} workers",
            run_id, seeded, crawler.workers
        );

        let status = self.snapshot(&lifecycle, None);
        Ok(status)
    }

    /// Begins draining a running crawl and returns the resulting state
    ///
    /// Calling it in any other state changes nothing and returns the current state.
    pub fn stop(&self) -> CrawlState {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state == CrawlState::Running {
            info!("Stop requested, draining crawl");
            self.shared.transition(&mut lifecycle, CrawlState::Draining);
            if let Some(run) = &lifecycle.run {
                run.cancel.cancel();
            }
        }
        lifecycle.state
    }

    pub fn state(&self) -> CrawlState {
        self.shared.lifecycle.lock().state
    }

    /// Returns a status snapshot
    ///
    /// # Errors
    ///
    /// Fails only when the record count cannot be read from the store.
    pub fn status(&self) -> Result<CrawlStatus, StorageError> {
        let total_records = self.store.count_records()?;
        let lifecycle = self.shared.lifecycle.lock();
        Ok(self.snapshot(&lifecycle, Some(total_records)))
    }

    /// Waits until no crawl is Running or Draining
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        if rx.wait_for(|state| !state.is_active()).await.is_err() {
            warn!("Crawl state channel closed while waiting for stop");
        }
    }

    /// Subscribes to state transitions
    pub fn subscribe(&self) -> watch::Receiver<CrawlState> {
        self.shared.state_tx.subscribe()
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn gate(&self) -> &Arc<PolitenessGate> {
        &self.gate
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    fn snapshot(&self, lifecycle: &Lifecycle, total_records: Option<u64>) -> CrawlStatus {
        let run = lifecycle.run.as_ref();
        let (pages_fetched, failures, retries, records_written) = run
            .map(|r| {
                let c = &r.counters;
                (
                    CrawlCounters::get(&c.pages_fetched),
                    CrawlCounters::get(&c.failures),
                    CrawlCounters::get(&c.retries),
                    CrawlCounters::get(&c.records_written),
                )
            })
            .unwrap_or_default();

        CrawlStatus {
            state: lifecycle.state,
            run_id: run.map(|r| r.run_id),
            queue_depth: self.frontier.len(),
            in_flight: self.frontier.in_flight_len(),
            total_records: total_records.unwrap_or(0),
            pages_fetched,
            failures,
            retries,
            records_written,
            started_at: run.map(|r| r.started_at),
            finished_at: run.and_then(|r| r.finished_at),
        }
    }
}

/// Task handles of one crawl, owned by its supervisor
struct SupervisedRun {
    run_id: i64,
    cancel: CancellationToken,
    counters: Arc<CrawlCounters>,
    workers: Vec<JoinHandle<()>>,
    ingest: JoinHandle<()>,
}

/// Walks the crawl from cancellation to Stopped
///
/// Draining ends only after every worker has exited and ingestion has flushed, so no
/// fetched page is lost between stages.
async fn supervise(shared: Arc<Shared>, store: Arc<dyn RecordStore>, run: SupervisedRun) {
    run.cancel.cancelled().await;

    let completed = {
        let mut lifecycle = shared.lifecycle.lock();
        if lifecycle.state == CrawlState::Running {
            shared.transition(&mut lifecycle, CrawlState::Draining);
            true
        } else {
            false
        }
    };

    for worker in run.workers {
        if let Err(e) = worker.await {
            error!("Worker task failed: {}", e);
        }
    }
    if let Err(e) = run.ingest.await {
        error!("Ingestion task failed: {}", e);
    }

    let pages = CrawlCounters::get(&run.counters.pages_fetched);
    let failures = CrawlCounters::get(&run.counters.failures);
    let status = if completed {
        RunStatus::Completed
    } else {
        RunStatus::Interrupted
    };
    if let Err(e) = store.finish_run(run.run_id, status, pages, failures) {
        error!("Failed to close run {}: {}", run.run_id, e);
    }

    let mut lifecycle = shared.lifecycle.lock();
    if let Some(handle) = lifecycle.run.as_mut().filter(|h| h.run_id == run.run_id) {
        handle.finished_at = Some(Utc::now());
    }
    shared.transition(&mut lifecycle, CrawlState::Stopped);

    info!(
        "Crawl run {} {}: {} pages fetched, {} failures, {} records written",
        run.run_id,
        status.to_db_string(),
        pages,
        failures,
        CrawlCounters::get(&run.counters.records_written)
    );
}
