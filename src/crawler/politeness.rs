//! Per-host politeness gate
//!
//! The gate is the only owner of [`HostState`]. Every check-and-update happens under a
//! single lock, so two callers can never both pass the delay check for the same host.

use crate::config::{Config, HostOverride};
use crate::crawler::clock::{Clock, SystemClock};
use crate::state::HostState;
use crate::url::{matches_wildcard, strip_port};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct PolitenessGate {
    hosts: Mutex<HashMap<String, HostState>>,
    default_delay: Duration,
    max_concurrency_per_host: u32,
    overrides: Vec<(String, Duration)>,
    clock: Arc<dyn Clock>,
}

impl PolitenessGate {
    /// Creates a gate with no per-host overrides
    pub fn new(default_delay: Duration, max_concurrency_per_host: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            default_delay,
            max_concurrency_per_host: max_concurrency_per_host.max(1),
            overrides: Vec::new(),
            clock,
        }
    }

    /// Creates a gate from the crawler settings and `[[host]]` overrides, on the system clock
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.crawler.crawl_delay(),
            config.crawler.max_concurrency_per_host,
            Arc::new(SystemClock),
        )
        .with_overrides(&config.hosts)
    }

    /// Adds per-host delay overrides; the first matching pattern wins
    pub fn with_overrides(mut self, overrides: &[HostOverride]) -> Self {
        self.overrides = overrides
            .iter()
            .map(|o| (o.pattern.to_lowercase(), Duration::from_millis(o.crawl_delay)))
            .collect();
        self
    }

    /// Asks to start a request against `host`
    ///
    /// On success the request time is recorded and the in-flight count incremented
    /// before the lock is released. On refusal nothing changes.
    ///
    /// # Arguments
    ///
    /// * `host` - Host key, including any non-default port
    ///
    /// # Returns
    ///
    /// * `true` - The crawl delay has elapsed and a concurrency slot was taken; the caller
    ///   must call [`PolitenessGate::release`] when the request finishes
    /// * `false` - The host is still cooling down or at its concurrency cap
    pub fn permit(&self, host: &str) -> bool {
        let now = self.clock.now();
        let mut hosts = self.hosts.lock();
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(host, self.configured_delay(host)));

        if !state.can_request(now, self.max_concurrency_per_host) {
            trace!(
                "Gate refused {} (in flight {}, wait {:?})",
                host,
                state.in_flight_count,
                state.delay_remaining(now)
            );
            return false;
        }

        state.record_request(now);
        trace!("Gate permitted {} (in flight {})", host, state.in_flight_count);
        true
    }

    /// Marks one request against `host` as finished
    pub fn release(&self, host: &str) {
        if let Some(state) = self.hosts.lock().get_mut(host) {
            state.release();
        }
    }

    /// Raises the crawl delay of `host` to at least `delay` (e.g. from robots.txt)
    pub fn raise_crawl_delay(&self, host: &str, delay: Duration) {
        let mut hosts = self.hosts.lock();
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(host, self.configured_delay(host)));
        if delay > state.crawl_delay {
            state.crawl_delay = delay;
        }
    }

    /// Returns the effective crawl delay for `host`
    pub fn crawl_delay(&self, host: &str) -> Duration {
        self.hosts
            .lock()
            .get(host)
            .map(|s| s.crawl_delay)
            .unwrap_or_else(|| self.configured_delay(host))
    }

    /// Returns how long until `host` passes the delay check (ignores the concurrency cap)
    pub fn delay_remaining(&self, host: &str) -> Duration {
        let now = self.clock.now();
        self.hosts
            .lock()
            .get(host)
            .map(|s| s.delay_remaining(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Returns a snapshot of the state of `host`
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        self.hosts.lock().get(host).cloned()
    }

    /// Total fetches currently holding a permit across all hosts
    pub fn in_flight(&self) -> u32 {
        self.hosts.lock().values().map(|s| s.in_flight_count).sum()
    }

    fn configured_delay(&self, host: &str) -> Duration {
        self.overrides
            .iter()
            .find(|(pattern, _)| {
                matches_wildcard(pattern, host) || matches_wildcard(pattern, strip_port(host))
            })
            .map(|(_, delay)| *delay)
            .unwrap_or(self.default_delay)
    }
}
