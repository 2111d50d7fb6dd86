//! Configuration module
//!
//! Configuration comes from an optional TOML file, then `WIKIGRAPH_*`
//! environment variables, and is validated before anything touches the
//! database or the network.
//!
//! # Example
//!
//! ```no_run
//! use wikigraph::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Some(Path::new("wikigraph.toml"))).unwrap();
//! println!("Workers: {}", config.crawler.concurrency);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, DatabaseConfig, EstimatorConfig, ServerConfig, WikiConfig,
};

pub use parser::{apply_env_overrides, compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
