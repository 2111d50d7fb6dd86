//! Output module for crawl reports
//!
//! This module handles:
//! - Summarizing the stored graph and job queue for the `stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
