//! HTTP client for the MediaWiki action API
//!
//! This module handles all outbound requests, including:
//! - Building the HTTP client with the identifying user agent
//! - Paginated link and backlink queries carrying the continuation blob
//! - Title info queries used by the resolver
//! - Bounded exponential backoff for transient failures

use crate::config::WikiConfig;
use crate::state::LinkDirection;
use crate::wiki::{
    Continuation, LinkSource, LinksPage, NamespaceSet, QueriedPage, RawLink, TitleQuery,
};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Builds an HTTP client with the configured user agent and timeouts
///
/// # Example
///
/// ```no_run
/// use wikigraph::config::WikiConfig;
/// use wikigraph::wiki::build_http_client;
///
/// let client = build_http_client(&WikiConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &WikiConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// MediaWiki API client
#[derive(Debug, Clone)]
pub struct WikiClient {
    client: Client,
    api_base: String,
    page_size: u32,
    max_attempts: u32,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl WikiClient {
    /// Creates a client from the API configuration
    pub fn new(config: &WikiConfig) -> Result<Self> {
        let client = build_http_client(config).map_err(|e| CrawlError::Network {
            url: config.api_base.clone(),
            message: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            page_size: config.page_size,
            max_attempts: config.max_attempts.max(1),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        })
    }

    /// Sends a query, retrying transient failures with exponential backoff
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Connect error / timeout | Retry |
    /// | HTTP 429, 5xx | Retry |
    /// | API-level `error` object | Retry |
    /// | Other HTTP status | Fail immediately |
    /// | Undecodable body | Fail immediately |
    async fn api_get(&self, params: &[(String, String)]) -> Result<ApiResponse> {
        let mut delay = self.backoff_initial;
        let mut attempt = 1;

        loop {
            match self.send_once(params).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "API request failed ({}), retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.backoff_max);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, params: &[(String, String)]) -> Result<ApiResponse> {
        let response = self
            .client
            .get(&self.api_base)
            .query(params)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                url: self.api_base.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.network_error(e))?;
        let parsed: ApiResponse = serde_json::from_str(&body)?;

        if let Some(error) = parsed.error {
            return Err(CrawlError::Network {
                url: self.api_base.clone(),
                message: format!("API error {}: {}", error.code, error.info),
            });
        }

        Ok(parsed)
    }

    fn network_error(&self, e: reqwest::Error) -> CrawlError {
        let message = if e.is_timeout() {
            "request timeout".to_string()
        } else if e.is_connect() {
            "connection failed".to_string()
        } else {
            e.to_string()
        };
        CrawlError::Network {
            url: self.api_base.clone(),
            message,
        }
    }

    fn links_params(
        &self,
        title: &str,
        direction: LinkDirection,
        namespaces: &NamespaceSet,
        cursor: Option<&Continuation>,
    ) -> Vec<(String, String)> {
        let mut params = base_params();
        match direction {
            LinkDirection::Outbound => {
                push(&mut params, "prop", "links");
                push(&mut params, "titles", title);
                push(&mut params, "pllimit", &self.page_size.to_string());
                push(&mut params, "plnamespace", &namespaces.to_api_param());
            }
            LinkDirection::Inbound => {
                push(&mut params, "list", "backlinks");
                push(&mut params, "bltitle", title);
                push(&mut params, "bllimit", &self.page_size.to_string());
                push(&mut params, "blnamespace", &namespaces.to_api_param());
            }
        }

        if let Some(Continuation(blob)) = cursor {
            for (key, value) in blob {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push((key.clone(), value));
            }
        }

        params
    }
}

#[async_trait]
impl LinkSource for WikiClient {
    async fn fetch_links_page(
        &self,
        title: &str,
        direction: LinkDirection,
        namespaces: &NamespaceSet,
        cursor: Option<&Continuation>,
    ) -> Result<LinksPage> {
        let params = self.links_params(title, direction, namespaces, cursor);
        let response = self.api_get(&params).await?;

        let query = response.query.unwrap_or_default();
        let links = match direction {
            LinkDirection::Outbound => query
                .pages
                .into_iter()
                .flat_map(|page| page.links)
                .collect::<Vec<_>>(),
            LinkDirection::Inbound => query.backlinks,
        };

        tracing::trace!(
            title,
            %direction,
            count = links.len(),
            more = response.continuation.is_some(),
            "Fetched links page"
        );

        Ok(LinksPage {
            links: links
                .into_iter()
                .map(|l| RawLink::new(l.title, l.ns))
                .collect(),
            next: response.continuation.map(Continuation),
        })
    }

    async fn query_titles(&self, titles: &[String]) -> Result<TitleQuery> {
        if titles.is_empty() {
            return Ok(TitleQuery::default());
        }

        let mut params = base_params();
        push(&mut params, "prop", "info");
        push(&mut params, "redirects", "1");
        push(&mut params, "titles", &titles.join("|"));

        let query = self.api_get(&params).await?.query.unwrap_or_default();

        Ok(TitleQuery {
            normalized: query
                .normalized
                .into_iter()
                .map(|m| (m.from, m.to))
                .collect(),
            redirects: query
                .redirects
                .into_iter()
                .map(|m| (m.from, m.to))
                .collect(),
            pages: query
                .pages
                .into_iter()
                .map(|p| QueriedPage {
                    page_id: p.pageid,
                    title: p.title,
                    namespace: p.ns,
                    missing: p.missing || p.invalid,
                    redirect: p.redirect,
                })
                .collect(),
        })
    }
}

fn base_params() -> Vec<(String, String)> {
    vec![
        ("action".to_string(), "query".to_string()),
        ("format".to_string(), "json".to_string()),
        ("formatversion".to_string(), "2".to_string()),
    ]
}

fn push(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    params.push((key.to_string(), value.to_string()));
}

// ===== Wire format (formatversion=2) =====

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResponse {
    query: Option<QueryBody>,
    #[serde(rename = "continue")]
    continuation: Option<serde_json::Map<String, serde_json::Value>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorBody {
    code: String,
    info: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryBody {
    pages: Vec<ApiPage>,
    backlinks: Vec<ApiLink>,
    normalized: Vec<TitleMapping>,
    redirects: Vec<TitleMapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiPage {
    pageid: Option<i64>,
    ns: i32,
    title: String,
    missing: bool,
    invalid: bool,
    redirect: bool,
    links: Vec<ApiLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiLink {
    ns: i32,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TitleMapping {
    from: String,
    to: String,
}
