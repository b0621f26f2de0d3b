//! URL frontier: a bounded, prioritized, deduplicated work queue
//!
//! Targets are ordered by priority (highest first) and then by discovery order. A
//! canonical URL is tracked from the moment it is enqueued until the end of the crawl:
//! first as queued, then as in flight, and finally as visited. Any of the three rejects
//! a new enqueue of the same URL.

use crate::crawler::politeness::PolitenessGate;
use crate::url::{canonicalize, host_key};
use crate::UrlError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace};
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone)]
pub struct FetchTarget {
    /// Canonical URL
    pub url: Url,

    /// Politeness key of the URL's host
    pub host: String,

    /// Higher is fetched sooner
    pub priority: i32,

    /// Link hops from a seed
    pub depth: u32,

    pub discovered_at: DateTime<Utc>,

    /// Number of transient failures so far
    pub retry_count: u32,

    /// Earliest instant a retried target may be dequeued again
    pub not_before: Option<Instant>,
}

impl FetchTarget {
    /// Creates a target from an absolute URL, canonicalizing it first
    pub fn new(url: Url, priority: i32, depth: u32) -> Result<Self, UrlError> {
        let url = canonicalize(url)?;
        let host = host_key(&url).ok_or(UrlError::MissingHost)?;
        Ok(Self {
            url,
            host,
            priority,
            depth,
            discovered_at: Utc::now(),
            retry_count: 0,
            not_before: None,
        })
    }

    /// Creates a depth-zero target from a seed string
    pub fn seed(url: &str, priority: i32) -> Result<Self, UrlError> {
        let url = Url::parse(url).map_err(|e| UrlError::Parse(e.to_string()))?;
        Self::new(url, priority, 0)
    }

    /// Creates a target for a link found on this target's page
    pub fn child(&self, url: Url, priority_step: i32) -> Result<Self, UrlError> {
        Self::new(url, self.priority.saturating_sub(priority_step), self.depth + 1)
    }

    /// The dedup key: the canonical URL string
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

/// Queue position: priority descending, then sequence ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: i32,
    seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct FrontierInner {
    queue: BTreeMap<QueueKey, FetchTarget>,
    queued: HashMap<String, QueueKey>,
    in_flight: HashSet<String>,
    visited: HashSet<String>,
    next_seq: u64,
}

impl FrontierInner {
    fn push(&mut self, target: FetchTarget) {
        let key = QueueKey {
            priority: target.priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queued.insert(target.key().to_string(), key);
        self.queue.insert(key, target);
    }

    fn is_known(&self, url: &str) -> bool {
        self.queued.contains_key(url) || self.in_flight.contains(url) || self.visited.contains(url)
    }
}

/// The shared URL frontier
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    capacity: usize,
    notify: Notify,
}

impl Frontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Inserts a target unless its URL is already queued, in flight, or visited
    ///
    /// When full, the lowest-priority entry (newest among equals) is evicted only if the
    /// new target has strictly higher priority. Otherwise the new target is dropped.
    ///
    /// # Arguments
    ///
    /// * `target` - Canonicalized target; its URL is the dedup key
    ///
    /// # Returns
    ///
    /// * `true` - The target was queued and waiters were woken
    /// * `false` - The URL was already known, or the frontier is full of higher-priority work
    pub fn enqueue(&self, target: FetchTarget) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.is_known(target.key()) {
                trace!("Frontier already knows {}", target.url);
                return false;
            }

            if inner.queue.len() >= self.capacity {
                let lowest = inner.queue.last_key_value().map(|(k, _)| k.priority);
                match lowest {
                    Some(lowest) if target.priority > lowest => {
                        if let Some((_, evicted)) = inner.queue.pop_last() {
                            inner.queued.remove(evicted.key());
                            debug!("Frontier full, evicted {}", evicted.url);
                        }
                    }
                    _ => {
                        debug!("Frontier full, dropped {}", target.url);
                        return false;
                    }
                }
            }

            inner.push(target);
        }
        self.notify.notify_waiters();
        true
    }

    /// Takes the highest-priority target whose host passes `host_filter`
    ///
    /// The filter is called under the frontier lock with the target's host key; a host
    /// that refuses once is not asked again during this call. Targets still in retry
    /// backoff are skipped. The returned target is marked in flight.
    pub fn dequeue<F>(&self, mut host_filter: F) -> Option<FetchTarget>
    where
        F: FnMut(&str) -> bool,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let chosen = {
            let mut refused: HashSet<&str> = HashSet::new();
            let mut chosen = None;
            for (key, target) in inner.queue.iter() {
                if target.not_before.is_some_and(|t| t > now) {
                    continue;
                }
                if refused.contains(target.host.as_str()) {
                    continue;
                }
                if host_filter(&target.host) {
                    chosen = Some(*key);
                    break;
                }
                refused.insert(target.host.as_str());
            }
            chosen
        }?;

        let target = inner.queue.remove(&chosen)?;
        inner.queued.remove(target.key());
        inner.in_flight.insert(target.key().to_string());
        Some(target)
    }

    /// Waits up to `timeout` for a target the gate permits
    ///
    /// Wakes on enqueue, requeue, completion, [`Frontier::wake`], and when the soonest
    /// host delay or retry backoff expires.
    pub async fn next(&self, gate: &PolitenessGate, timeout: Duration) -> Option<FetchTarget> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(target) = self.dequeue(|host| gate.permit(host)) {
                return Some(target);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }

            let wake_at = match self.next_eligible_in(gate) {
                Some(wait) => deadline.min(now + wait),
                None => deadline,
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Ends the in-flight period of `url` and remembers it as visited
    pub fn complete(&self, url: &str) {
        {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(url);
            inner.visited.insert(url.to_string());
        }
        self.notify.notify_waiters();
    }

    /// Moves an in-flight target back into the queue for a retry
    ///
    /// Retries bypass the capacity check so a transient failure never loses a target.
    pub fn requeue(&self, target: FetchTarget) {
        {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(target.key());
            inner.push(target);
        }
        self.notify.notify_waiters();
    }

    /// Wakes every task waiting in [`Frontier::next`]
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Number of queued targets
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// True when nothing is queued and nothing is in flight, checked atomically
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock();
        inner.queue.is_empty() && inner.in_flight.is_empty()
    }

    /// True if `url` is currently queued or in flight
    pub fn contains(&self, url: &str) -> bool {
        let inner = self.inner.lock();
        inner.queued.contains_key(url) || inner.in_flight.contains(url)
    }

    /// Forgets everything, including the visited set
    pub fn clear(&self) {
        *self.inner.lock() = FrontierInner::default();
        self.notify.notify_waiters();
    }

    /// Time until the soonest queued target could pass its backoff and host delay
    ///
    /// Returns None when nothing is waiting on time alone (empty, or only blocked by a
    /// concurrency cap, which a release will signal).
    fn next_eligible_in(&self, gate: &PolitenessGate) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut seen: HashSet<&str> = HashSet::new();

        inner
            .queue
            .values()
            .filter_map(|target| {
                let backoff = target
                    .not_before
                    .map(|t| t.saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO);
                let delay = if seen.insert(target.host.as_str()) {
                    gate.delay_remaining(&target.host)
                } else {
                    Duration::ZERO
                };
                let wait = backoff.max(delay);
                (!wait.is_zero()).then_some(wait)
            })
            .min()
            .map(|wait| wait.max(Duration::from_millis(1)))
    }
}
