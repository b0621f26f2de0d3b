use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Driftnet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Initial URLs supplied to the frontier when a crawl starts
    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Per-host crawl-delay overrides
    #[serde(default, rename = "host")]
    pub hosts: Vec<HostOverride>,

    #[serde(default)]
    pub scope: ScopeConfig,

    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    pub workers: u32,

    /// Maximum simultaneous fetches against a single host
    pub max_concurrency_per_host: u32,

    /// Default minimum time between requests to the same host (milliseconds)
    pub crawl_delay: u64,

    /// Network retrieval timeout per fetch (milliseconds)
    pub fetch_timeout: u64,

    /// How long a worker waits on an empty or ineligible frontier (milliseconds)
    pub dequeue_timeout: u64,

    /// Retry budget for transient fetch failures
    pub max_retries: u32,

    /// Base backoff before a retried target becomes eligible again (milliseconds)
    pub retry_backoff: u64,

    /// Priority subtracted from a target each time it is retried
    pub retry_priority_penalty: i32,

    /// Maximum number of queued targets
    pub frontier_capacity: usize,

    /// Maximum number of link hops from a seed
    pub max_depth: u32,

    /// Priority given to seed URLs
    pub seed_priority: i32,

    /// Priority lost per link hop
    pub link_priority_step: i32,

    /// Drain and stop once nothing is queued or in flight
    pub stop_when_idle: bool,

    /// Fetch and honour robots.txt for every host
    pub respect_robots_txt: bool,

    /// Capacity of the fetcher → ingestion hand-off channel
    pub channel_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_concurrency_per_host: 1,
            crawl_delay: 1000,
            fetch_timeout: 10_000,
            dequeue_timeout: 1000,
            max_retries: 3,
            retry_backoff: 500,
            retry_priority_penalty: 10,
            frontier_capacity: 10_000,
            max_depth: 3,
            seed_priority: 100,
            link_priority_step: 1,
            stop_when_idle: true,
            respect_robots_txt: true,
            channel_capacity: 64,
        }
    }
}

impl CrawlerConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Result store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Query API server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// Socket address the API listens on
    pub bind_address: String,

    /// Start a crawl as soon as the server is up
    pub autostart: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            autostart: false,
        }
    }
}

/// Crawl-delay override for hosts matching a pattern
#[derive(Debug, Clone, Deserialize)]
pub struct HostOverride {
    /// Host pattern (e.g., "example.com" or "*.example.com")
    pub pattern: String,

    /// Minimum time between requests to matching hosts (milliseconds)
    #[serde(rename = "crawl-delay")]
    pub crawl_delay: u64,
}

/// Which hosts discovered links may be followed to
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeConfig {
    /// Host patterns that may be crawled; empty means every host not denied
    #[serde(default)]
    pub allow: Vec<String>,

    /// Host patterns that are never crawled
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Extraction schema configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtractConfig {
    /// CSS selector for elements whose `href` is followed
    pub link_selector: String,

    /// Whether discovered links are proposed to the frontier
    pub follow_links: bool,

    /// Fields that make up the content hash; empty means all fields
    pub hash_fields: Vec<String>,

    /// Field extraction rules
    #[serde(rename = "field")]
    pub fields: Vec<FieldConfig>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            link_selector: "a[href]".to_string(),
            follow_links: true,
            hash_fields: Vec::new(),
            fields: vec![
                FieldConfig {
                    name: "title".to_string(),
                    selector: "title".to_string(),
                    attribute: None,
                    multiple: false,
                    required: false,
                },
                FieldConfig {
                    name: "description".to_string(),
                    selector: "meta[name='description']".to_string(),
                    attribute: Some("content".to_string()),
                    multiple: false,
                    required: false,
                },
            ],
        }
    }
}

/// A single selector → field mapping
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    /// Output field name
    pub name: String,

    /// CSS selector
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Collect every match into an array instead of the first match
    #[serde(default)]
    pub multiple: bool,

    /// A page without this field produces no record
    #[serde(default)]
    pub required: bool,
}
