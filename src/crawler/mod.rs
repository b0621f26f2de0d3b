//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The prioritized, deduplicated URL frontier
//! - The per-host politeness gate
//! - HTTP fetching with transient/permanent failure classification
//! - Record and link extraction
//! - The worker pool, the ingestion stage and overall crawl coordination

pub mod clock;
mod coordinator;
mod fetcher;
mod frontier;
mod ingest;
mod parser;
mod politeness;
mod pool;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, CrawlStatus};
pub use fetcher::{
    build_http_client, classify_status, fetch_target, is_html_content_type, FetchError,
    FetchResult,
};
pub use frontier::{FetchTarget, Frontier};
pub use parser::{content_hash, parse, ExtractionError, ExtractionSchema, ParsedPage};
pub use politeness::PolitenessGate;
pub use pool::{CrawlCounters, WorkerOutput};
