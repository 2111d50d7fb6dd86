use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// working configuration pointed at English Wikipedia.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub wiki: WikiConfig,
    pub crawler: CrawlerConfig,
    pub estimator: EstimatorConfig,
    pub server: ServerConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path, or `:memory:`
    #[serde(rename = "url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "wikigraph.db".to_string(),
        }
    }
}

/// External MediaWiki API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    /// Endpoint of the MediaWiki action API
    #[serde(rename = "api-base")]
    pub api_base: String,

    /// Identifying client string sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Number of links requested per API page
    #[serde(rename = "page-size")]
    pub page_size: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Attempts per request before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// First retry delay (milliseconds), doubled on each further attempt
    #[serde(rename = "backoff-initial-ms")]
    pub backoff_initial_ms: u64,

    /// Upper bound on a single retry delay (milliseconds)
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://en.wikipedia.org/w/api.php".to_string(),
            user_agent: "WikiGraphExplorer/0.1".to_string(),
            page_size: 500,
            timeout_secs: 30,
            max_attempts: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl WikiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of workers polling the job queue
    pub concurrency: u32,

    /// Sleep between polls when the queue is empty (seconds)
    #[serde(rename = "poll-seconds")]
    pub poll_seconds: f64,

    /// Maximum links merged per page; 0 means unlimited
    #[serde(rename = "max-links-per-page")]
    pub max_links_per_page: u32,

    /// Namespaces a crawl may touch
    #[serde(rename = "allow-namespaces")]
    pub allow_namespaces: Vec<i32>,

    /// Default BFS depth limit for cascading crawls
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Running jobs older than this are considered stuck (minutes)
    #[serde(rename = "stale-job-minutes")]
    pub stale_job_minutes: u64,

    /// Consecutive store failures after which claiming stops
    #[serde(rename = "max-consecutive-db-failures")]
    pub max_consecutive_db_failures: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            poll_seconds: 1.0,
            max_links_per_page: 0,
            allow_namespaces: vec![0],
            max_depth: 6,
            stale_job_minutes: 120,
            max_consecutive_db_failures: 5,
        }
    }
}

impl CrawlerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_seconds)
    }
}

/// Blast-radius estimator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// How many first-degree neighbors to sample
    #[serde(rename = "sample-size")]
    pub sample_size: usize,

    /// Link pages read at most when counting one page's links
    #[serde(rename = "max-count-pages")]
    pub max_count_pages: u32,

    /// Fraction of raw second-degree hits assumed to be unique pages
    #[serde(rename = "overlap-discount")]
    pub overlap_discount: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            max_count_pages: 4,
            overlap_discount: 0.6,
        }
    }
}

/// Administrative HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}
