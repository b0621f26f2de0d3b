//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Bounded-time GET requests
//! - Classifying failures as transient (retried) or permanent

use crate::config::UserAgentConfig;
use crate::crawler::frontier::FetchTarget;
use crate::storage::FailureKind;
use chrono::{DateTime, Utc};
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Maximum redirect hops followed per fetch
const MAX_REDIRECTS: usize = 10;

/// Why a fetch produced no usable body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeouts, connection failures, 408, 429 and 5xx
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Other 4xx, unsupported content, robots.txt disallow, malformed URLs
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Outcome of fetching one target
///
/// Owned by the worker that produced it until it is handed to ingestion.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub target: FetchTarget,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    /// URL after redirects; used as the base for relative links
    pub final_url: Url,
    pub fetched_at: DateTime<Utc>,
    pub error: Option<FetchError>,
}

impl FetchResult {
    /// A result that failed before or during the request
    pub fn failed(target: FetchTarget, status_code: Option<u16>, error: FetchError) -> Self {
        let final_url = target.url.clone();
        Self {
            target,
            status_code,
            content_type: None,
            body: None,
            final_url,
            fetched_at: Utc::now(),
            error: Some(error),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use driftnet::config::UserAgentConfig;
/// use driftnet::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "Driftnet".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(10)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a target, bounded by `timeout`
///
/// Never panics and never returns early without a result: every failure is folded into
/// `FetchResult::error`.
pub async fn fetch_target(client: &Client, target: FetchTarget, timeout: Duration) -> FetchResult {
    let started = tokio::time::Instant::now();
    let result = match tokio::time::timeout(timeout, fetch_inner(client, &target.url)).await {
        Ok(Ok(page)) => FetchResult {
            target,
            status_code: Some(page.status),
            content_type: page.content_type,
            body: Some(page.body),
            final_url: page.final_url,
            fetched_at: Utc::now(),
            error: None,
        },
        Ok(Err((status, error))) => FetchResult::failed(target, status, error),
        Err(_) => FetchResult::failed(
            target,
            None,
            FetchError::Transient(format!("timed out after {:?}", timeout)),
        ),
    };

    debug!(
        "Fetched {} in {:?}: status={:?} error={:?}",
        result.target.url,
        started.elapsed(),
        result.status_code,
        result.error
    );
    result
}

struct FetchedPage {
    status: u16,
    content_type: Option<String>,
    body: String,
    final_url: Url,
}

async fn fetch_inner(client: &Client, url: &Url) -> Result<FetchedPage, (Option<u16>, FetchError)> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| (e.status().map(|s| s.as_u16()), classify_transport_error(&e)))?;

    let status = response.status();
    if let Some(error) = classify_status(status) {
        return Err((Some(status.as_u16()), error));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !is_html_content_type(content_type.as_deref()) {
        return Err((
            Some(status.as_u16()),
            FetchError::Permanent(format!(
                "unsupported content type: {}",
                content_type.as_deref().unwrap_or_default()
            )),
        ));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| (Some(status.as_u16()), FetchError::Transient(e.to_string())))?;

    Ok(FetchedPage {
        status: status.as_u16(),
        content_type,
        body,
        final_url,
    })
}

/// Maps a response status to a fetch error; `None` means the body is usable
///
/// | Status | Classification |
/// |--------|----------------|
/// | 2xx | success |
/// | 408, 429, 5xx | transient |
/// | other 4xx, 1xx, unfollowed 3xx | permanent |
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let message = format!("HTTP {}", status.as_u16());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Some(FetchError::Transient(message))
    } else {
        Some(FetchError::Permanent(message))
    }
}

/// Maps a reqwest transport error to a fetch error
fn classify_transport_error(error: &reqwest::Error) -> FetchError {
    if error.is_redirect() || error.is_builder() {
        FetchError::Permanent(error.to_string())
    } else {
        FetchError::Transient(error.to_string())
    }
}

/// Accepts HTML and XHTML; a missing header is treated as HTML
pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(value) => {
            let mime = value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            mime.is_empty() || mime == "text/html" || mime == "application/xhtml+xml"
        }
    }
}
