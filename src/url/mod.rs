//! URL handling module for Driftnet
//!
//! This module provides URL canonicalization, host key extraction, wildcard matching,
//! and host scope classification.

mod canonical;
mod host;
mod matcher;

use crate::config::ScopeConfig;

// Re-export main functions
pub use canonical::{canonicalize, canonicalize_url};
pub use host::{host_key, strip_port};
pub use matcher::matches_wildcard;

/// Scope classification of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClassification {
    /// Host may be crawled
    Allowed,
    /// Host matches a deny pattern
    Denied,
    /// An allow list is configured and the host is not on it
    OutOfScope,
}

impl HostClassification {
    /// Returns true if links to this host should be proposed to the frontier
    pub fn should_crawl(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Classifies a host key according to the configured scope
///
/// Deny patterns are checked first, then the allow list. An empty allow list admits
/// every host that is not denied. Patterns are tried against the full host key and
/// against the host without its port, so `"127.0.0.1"` also covers `"127.0.0.1:8080"`.
///
/// # Examples
///
/// ```
/// use driftnet::config::ScopeConfig;
/// use driftnet::url::{classify_host, HostClassification};
///
/// let scope = ScopeConfig {
///     allow: vec!["*.example.com".to_string()],
///     deny: vec!["ads.example.com".to_string()],
/// };
///
/// assert_eq!(classify_host("blog.example.com", &scope), HostClassification::Allowed);
/// assert_eq!(classify_host("ads.example.com", &scope), HostClassification::Denied);
/// assert_eq!(classify_host("other.org", &scope), HostClassification::OutOfScope);
/// ```
pub fn classify_host(host: &str, scope: &ScopeConfig) -> HostClassification {
    let matches = |pattern: &String| {
        matches_wildcard(pattern, host) || matches_wildcard(pattern, strip_port(host))
    };

    if scope.deny.iter().any(matches) {
        return HostClassification::Denied;
    }

    if scope.allow.is_empty() || scope.allow.iter().any(matches) {
        HostClassification::Allowed
    } else {
        HostClassification::OutOfScope
    }
}
