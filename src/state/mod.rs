//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlState`: The coordinator lifecycle (idle, running, draining, stopped)
//! - `HostState`: Per-host request spacing and in-flight accounting used by the politeness gate

mod crawl_state;
mod host_state;

// Re-export main types
pub use crawl_state::CrawlState;
pub use host_state::HostState;
