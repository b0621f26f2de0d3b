//! Output module for crawl reports
//!
//! This module turns the contents of the result store into the human-readable
//! statistics printed by `driftnet --stats` and at the end of a `--crawl-only` run.

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, CrawlStatistics};
