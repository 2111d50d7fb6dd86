//! Statistics over the link graph and job queue
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::state::JobStatus;
use crate::storage::Storage;
use crate::Result;
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistics {
    /// Total number of pages in the graph
    pub total_pages: u64,

    /// Total number of directed links
    pub total_links: u64,

    /// Count of jobs by status
    pub jobs_by_status: BTreeMap<JobStatus, u64>,

    /// Count of jobs by BFS depth from their root
    pub jobs_by_depth: BTreeMap<u32, u64>,
}

impl CrawlStatistics {
    pub fn total_jobs(&self) -> u64 {
        self.jobs_by_status.values().sum()
    }

    fn jobs_in(&self, status: JobStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(CrawlError)` - Failed to query statistics
pub fn load_statistics<S: Storage + ?Sized>(storage: &S) -> Result<CrawlStatistics> {
    Ok(CrawlStatistics {
        total_pages: storage.count_pages()?,
        total_links: storage.count_links()?,
        jobs_by_status: storage.count_jobs_by_status()?.into_iter().collect(),
        jobs_by_depth: storage.depth_breakdown()?.into_iter().collect(),
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Graph Statistics ===\n");

    println!("Overview:");
    println!("  Pages: {}", stats.total_pages);
    println!("  Links: {}", stats.total_links);
    if stats.total_pages > 0 {
        println!(
            "  Average out-degree: {:.2}",
            stats.total_links as f64 / stats.total_pages as f64
        );
    }
    println!();

    let total_jobs = stats.total_jobs();
    println!("Jobs by Status ({} total):", total_jobs);
    for status in JobStatus::all() {
        let count = stats.jobs_in(status);
        if count == 0 {
            continue;
        }
        let percentage = (count as f64 / total_jobs as f64) * 100.0;
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.jobs_by_depth.is_empty() {
        println!("Jobs by Depth:");
        for (depth, count) in &stats.jobs_by_depth {
            println!("  {}: {}", depth, count);
        }
        println!();
    }

    let settled = stats.jobs_in(JobStatus::Done) + stats.jobs_in(JobStatus::Error);
    if settled > 0 {
        println!(
            "Success Rate: {:.1}% ({} / {} settled jobs done)",
            stats.jobs_in(JobStatus::Done) as f64 / settled as f64 * 100.0,
            stats.jobs_in(JobStatus::Done),
            settled
        );
    }
}
