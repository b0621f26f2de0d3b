//! Robots.txt caching implementation
//!
//! Entries expire after 24 hours and are refetched on the next lookup.

use crate::robots::{fetch_robots, ParsedRobots};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use url::Url;

/// Cached robots.txt data for a host
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Creates a new CachedRobots stamped with the current time
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Per-host robots.txt cache shared by all workers
#[derive(Debug, Default)]
pub struct RobotsCache {
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rules for `host`, fetching them if missing or stale
    ///
    /// The lock is not held across the fetch. Two workers racing on a cold host may both
    /// fetch; the later insert wins.
    pub async fn get(&self, client: &reqwest::Client, host: &str, url: &Url) -> ParsedRobots {
        if let Some(cached) = self.cached(host) {
            return cached;
        }

        let robots = fetch_robots(client, url).await;
        self.insert(host, robots.clone());
        robots
    }

    /// Returns fresh cached rules for `host`, if any
    pub fn cached(&self, host: &str) -> Option<ParsedRobots> {
        let entries = self.entries.lock();
        entries
            .get(host)
            .filter(|entry| !entry.is_stale())
            .map(|entry| entry.content.clone())
    }

    pub fn insert(&self, host: &str, robots: ParsedRobots) {
        self.entries
            .lock()
            .insert(host.to_string(), CachedRobots::new(robots));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
