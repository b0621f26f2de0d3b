use std::time::{Duration, Instant};

/// Tracks the politeness state of a single host during crawling
///
/// A host is the URL host plus any non-default port. Only the politeness gate
/// mutates these values, always under its lock.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Host key (e.g., "example.com" or "127.0.0.1:8080")
    pub host: String,

    /// Timestamp of the last permitted request to this host
    pub last_request_at: Option<Instant>,

    /// Number of fetches currently running against this host
    pub in_flight_count: u32,

    /// Minimum time between requests to this host
    pub crawl_delay: Duration,

    /// Number of requests permitted for this host in the current process
    pub total_requests: u64,
}

impl HostState {
    /// Creates a new HostState with no request history
    pub fn new(host: impl Into<String>, crawl_delay: Duration) -> Self {
        Self {
            host: host.into(),
            last_request_at: None,
            in_flight_count: 0,
            crawl_delay,
            total_requests: 0,
        }
    }

    /// Checks if a request can be made to this host
    ///
    /// This method enforces:
    /// - The per-host concurrency cap
    /// - Minimum time between requests to the same host
    pub fn can_request(&self, now: Instant, max_concurrency: u32) -> bool {
        if self.in_flight_count >= max_concurrency {
            return false;
        }

        self.delay_remaining(now).is_zero()
    }

    /// Records that a request was permitted to this host
    pub fn record_request(&mut self, now: Instant) {
        self.last_request_at = Some(now);
        self.in_flight_count += 1;
        self.total_requests += 1;
    }

    /// Records that a request to this host finished
    pub fn release(&mut self) {
        self.in_flight_count = self.in_flight_count.saturating_sub(1);
    }

    /// Calculates the time until the delay check passes
    ///
    /// Returns `Duration::ZERO` if the host's crawl delay has already elapsed.
    pub fn delay_remaining(&self, now: Instant) -> Duration {
        match self.last_request_at {
            Some(last) => self
                .crawl_delay
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}
