//! Robots.txt handling module
//!
//! This module fetches, parses, and caches robots.txt files per host. Workers consult the
//! cache before every fetch when `respect-robots-txt` is enabled.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use tracing::{debug, warn};
use url::Url;

/// Fetches robots.txt for the origin of `url`
///
/// A 2xx response is parsed. Any other status, a transport error, or a non-UTF-8 body is
/// treated as "no restrictions" so an unreachable robots.txt never blocks a crawl.
pub async fn fetch_robots(client: &reqwest::Client, url: &Url) -> ParsedRobots {
    let mut robots_url = url.clone();
    robots_url.set_path("/robots.txt");
    robots_url.set_query(None);
    robots_url.set_fragment(None);

    let response = match client.get(robots_url.as_str()).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to fetch {}: {}", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    let status = response.status();
    if !status.is_success() {
        debug!("{} returned {}, allowing all", robots_url, status);
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            warn!("Failed to read {}: {}", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
