//! WikiGraph: an incremental crawler for the Wikipedia link graph
//!
//! This crate discovers pages and their hyperlinks through the MediaWiki API,
//! persists them as a directed graph in SQLite, and drives the crawl through a
//! persistent, prioritized job queue worked by a bounded pool of workers.

pub mod admin;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod wiki;

use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Could not resolve title: {0}")]
    TitleResolution(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawl cancelled ({0})")]
    Cancelled(crawler::CancelReason),

    #[error("A job for page {0} is already running")]
    AlreadyActive(i64),

    #[error("No job found for page {0}")]
    JobNotFound(i64),

    #[error("Unexpected API response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns true for failures of the graph/job store itself
    ///
    /// A run of these halts the scheduler's poll loop instead of letting it spin.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Storage(storage::StorageError::Sqlite(_))
                | Self::Storage(storage::StorageError::LockPoisoned)
        )
    }

    /// Returns true for failures worth retrying against the external API
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid namespace list: {0}")]
    InvalidNamespaces(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{JobStatus, LinkDirection};
pub use storage::{SqliteStorage, Storage, StorageError};
