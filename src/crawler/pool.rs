//! Fetcher pool: worker tasks that pull targets through the politeness gate
//!
//! Each worker loops on [`Frontier::next`] until the shared cancellation token fires.
//! Successful fetches and terminal failures go to the ingestion task over a bounded
//! channel; transient failures with retry budget left are requeued here.

use crate::crawler::fetcher::{fetch_target, FetchError, FetchResult};
use crate::crawler::frontier::{FetchTarget, Frontier};
use crate::crawler::politeness::PolitenessGate;
use crate::robots::RobotsCache;
use crate::storage::FailureRecord;
use chrono::Utc;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on a single retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Crawl progress counters shared by the workers, ingestion and status reporting
#[derive(Debug, Default)]
pub struct CrawlCounters {
    pub pages_fetched: AtomicU64,
    pub failures: AtomicU64,
    pub retries: AtomicU64,
    pub records_written: AtomicU64,
    pub extraction_issues: AtomicU64,
}

impl CrawlCounters {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a worker hands to the ingestion stage
#[derive(Debug)]
pub enum WorkerOutput {
    Fetched(FetchResult),
    Failed(FailureRecord),
}

impl WorkerOutput {
    /// The frontier key of the target this output completes
    pub fn url(&self) -> &str {
        match self {
            Self::Fetched(result) => result.target.key(),
            Self::Failed(failure) => &failure.url,
        }
    }
}

/// Fixed per-crawl worker settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub fetch_timeout: Duration,
    pub dequeue_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_priority_penalty: i32,
    pub stop_when_idle: bool,
    pub respect_robots_txt: bool,
    /// Product token matched against robots.txt groups
    pub robots_agent: String,
    pub run_id: Option<i64>,
}

/// Everything a worker needs, shared by all workers of one crawl
pub struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub gate: Arc<PolitenessGate>,
    pub client: Client,
    pub robots: Arc<RobotsCache>,
    pub settings: WorkerSettings,
    pub output: mpsc::Sender<WorkerOutput>,
    pub cancel: CancellationToken,
    pub counters: Arc<CrawlCounters>,
}

/// Runs one worker until cancellation or until the ingestion channel closes
pub async fn run_worker(id: usize, ctx: Arc<WorkerContext>) {
    debug!("Worker {} started", id);

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = ctx.frontier.next(&ctx.gate, ctx.settings.dequeue_timeout) => next,
        };

        let Some(target) = next else {
            if ctx.settings.stop_when_idle && ctx.frontier.is_quiescent() {
                info!("Frontier is empty and nothing is in flight, draining crawl");
                ctx.cancel.cancel();
                break;
            }
            continue;
        };

        if let Some(output) = process_target(&ctx, target).await {
            if ctx.output.send(output).await.is_err() {
                warn!("Worker {}: ingestion channel closed", id);
                break;
            }
        }
    }

    debug!("Worker {} exiting", id);
}

/// Fetches one permitted target
///
/// Returns None when the target was requeued for a retry.
async fn process_target(ctx: &WorkerContext, target: FetchTarget) -> Option<WorkerOutput> {
    let host = target.host.clone();

    if ctx.settings.respect_robots_txt {
        if let Some(refusal) = check_robots(ctx, &target).await {
            ctx.gate.release(&host);
            ctx.frontier.wake();
            return Some(WorkerOutput::Failed(failure_record(
                &ctx.settings,
                &target,
                None,
                &refusal,
            )));
        }
    }

    let result = fetch_target(&ctx.client, target, ctx.settings.fetch_timeout).await;
    ctx.gate.release(&host);
    ctx.frontier.wake();

    let error = match &result.error {
        None => {
            CrawlCounters::bump(&ctx.counters.pages_fetched);
            return Some(WorkerOutput::Fetched(result));
        }
        Some(error) => error.clone(),
    };

    if error.is_transient() && result.target.retry_count < ctx.settings.max_retries {
        let retry = retry_target(&ctx.settings, result.target);
        warn!(
            "Transient failure for {} ({}), retry {} of {}",
            retry.url,
            error.message(),
            retry.retry_count,
            ctx.settings.max_retries
        );
        CrawlCounters::bump(&ctx.counters.retries);
        ctx.frontier.requeue(retry);
        return None;
    }

    Some(WorkerOutput::Failed(failure_record(
        &ctx.settings,
        &result.target,
        result.status_code,
        &error,
    )))
}

/// Applies robots.txt rules; returns the permanent error for a disallowed URL
async fn check_robots(ctx: &WorkerContext, target: &FetchTarget) -> Option<FetchError> {
    let robots = ctx.robots.get(&ctx.client, &target.host, &target.url).await;

    if let Some(delay) = robots.crawl_delay(&ctx.settings.robots_agent) {
        ctx.gate.raise_crawl_delay(&target.host, delay);
    }

    if robots.is_allowed(target.url.as_str(), &ctx.settings.robots_agent) {
        None
    } else {
        debug!("{} disallowed by robots.txt", target.url);
        Some(FetchError::Permanent("disallowed by robots.txt".to_string()))
    }
}

/// Builds the retry copy of a target: one more retry, lower priority, exponential backoff
pub fn retry_target(settings: &WorkerSettings, mut target: FetchTarget) -> FetchTarget {
    let backoff = settings
        .retry_backoff
        .saturating_mul(2u32.saturating_pow(target.retry_count))
        .min(MAX_BACKOFF);
    target.retry_count += 1;
    target.priority = target.priority.saturating_sub(settings.retry_priority_penalty);
    target.not_before = Some(Instant::now() + backoff);
    target
}

fn failure_record(
    settings: &WorkerSettings,
    target: &FetchTarget,
    status_code: Option<u16>,
    error: &FetchError,
) -> FailureRecord {
    FailureRecord {
        run_id: settings.run_id,
        url: target.key().to_string(),
        host: target.host.clone(),
        kind: error.kind(),
        status_code,
        message: error.message().to_string(),
        retry_count: target.retry_count,
        failed_at: Utc::now(),
    }
}
