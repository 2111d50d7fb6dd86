//! State module for crawl jobs
//!
//! # Components
//!
//! - `JobStatus`: lifecycle of a crawl job (discovered, queued, running, done, error, paused)
//! - `LinkDirection`: whether a crawl follows a page's links or its backlinks

mod job_status;
mod link_direction;

pub use job_status::JobStatus;
pub use link_direction::LinkDirection;
