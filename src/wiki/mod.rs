//! MediaWiki link-graph access
//!
//! This module contains everything that talks to (or models) the external API:
//! - `LinkSource`: the seam the crawler fetches through
//! - `WikiClient`: the reqwest implementation with retry and backoff
//! - `TitleResolver`: batch resolution of raw link titles to canonical pages

mod client;
mod resolver;

pub use client::{build_http_client, WikiClient};
pub use resolver::{TitleResolver, RESOLVE_BATCH_SIZE};

use crate::state::LinkDirection;
use crate::ConfigError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A link title as returned by the link API, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub title: String,
    pub namespace: i32,
}

impl RawLink {
    pub fn new(title: impl Into<String>, namespace: i32) -> Self {
        Self {
            title: title.into(),
            namespace,
        }
    }
}

/// Opaque pagination state handed back by the link API
///
/// The crawler never looks inside; it stores the blob and replays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Continuation(pub serde_json::Map<String, serde_json::Value>);

/// One page of link results
#[derive(Debug, Clone, Default)]
pub struct LinksPage {
    pub links: Vec<RawLink>,
    /// Present while more pages remain
    pub next: Option<Continuation>,
}

/// A canonical page produced by title resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPage {
    pub page_id: i64,
    pub title: String,
    pub namespace: i32,
    pub is_redirect: bool,
    pub redirect_target_id: Option<i64>,
}

impl ResolvedPage {
    pub fn new(page_id: i64, title: impl Into<String>, namespace: i32) -> Self {
        Self {
            page_id,
            title: title.into(),
            namespace,
            is_redirect: false,
            redirect_target_id: None,
        }
    }
}

/// Raw answer of a title info query, before redirects are followed
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    /// `from -> to` title normalizations
    pub normalized: Vec<(String, String)>,
    /// `from -> to` redirects
    pub redirects: Vec<(String, String)>,
    pub pages: Vec<QueriedPage>,
}

/// One page entry of a title info query
#[derive(Debug, Clone, Default)]
pub struct QueriedPage {
    pub page_id: Option<i64>,
    pub title: String,
    pub namespace: i32,
    pub missing: bool,
    pub redirect: bool,
}

/// Source of link data for the crawler
///
/// `WikiClient` is the production implementation; tests substitute an
/// in-memory source.
#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Fetches one page of link titles for `title`
    ///
    /// `cursor` is the continuation returned by the previous call, or `None`
    /// to start from the beginning.
    async fn fetch_links_page(
        &self,
        title: &str,
        direction: LinkDirection,
        namespaces: &NamespaceSet,
        cursor: Option<&Continuation>,
    ) -> crate::Result<LinksPage>;

    /// Looks up page info for at most [`RESOLVE_BATCH_SIZE`] titles
    async fn query_titles(&self, titles: &[String]) -> crate::Result<TitleQuery>;
}

/// The set of namespaces a crawl is allowed to touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceSet(BTreeSet<i32>);

impl NamespaceSet {
    /// Parses a comma-separated list such as `"0, 14"`
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut set = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let ns: i32 = part.parse().map_err(|_| {
                ConfigError::InvalidNamespaces(format!("'{}' is not a namespace number", part))
            })?;
            if ns < 0 {
                return Err(ConfigError::InvalidNamespaces(format!(
                    "namespace {} is negative",
                    ns
                )));
            }
            set.insert(ns);
        }
        if set.is_empty() {
            return Err(ConfigError::InvalidNamespaces(format!(
                "'{}' names no namespaces",
                s
            )));
        }
        Ok(Self(set))
    }

    pub fn from_slice(namespaces: &[i32]) -> Self {
        Self(namespaces.iter().copied().collect())
    }

    /// The main (article) namespace only
    pub fn main() -> Self {
        Self::from_slice(&[0])
    }

    pub fn contains(&self, ns: i32) -> bool {
        self.0.contains(&ns)
    }

    pub fn to_vec(&self) -> Vec<i32> {
        self.0.iter().copied().collect()
    }

    /// Comma-separated form stored in the job table
    pub fn to_db_string(&self) -> String {
        self.join(",")
    }

    /// Pipe-separated form used by MediaWiki list parameters
    pub fn to_api_param(&self) -> String {
        self.join("|")
    }

    fn join(&self, sep: &str) -> String {
        self.0
            .iter()
            .map(|ns| ns.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::main()
    }
}
