//! Lifecycle states of a crawl coordinator

use serde::Serialize;
use std::fmt;

/// Represents the current state of a crawl
///
/// Transitions: `Idle → Running → Draining → Stopped`. A stopped coordinator may be
/// started again, which begins a fresh crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    /// No crawl has been started yet
    Idle,

    /// Workers are dequeuing and fetching
    Running,

    /// No new dequeues; in-flight fetches and pending writes are finishing
    Draining,

    /// Every worker has exited and pending writes are flushed
    Stopped,
}

impl CrawlState {
    /// Returns true while workers may still be fetching
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }

    /// Returns true if `start()` is allowed from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Parses a state from its string form
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "draining" => Some(Self::Draining),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
