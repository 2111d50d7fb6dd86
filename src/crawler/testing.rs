//! In-memory link source for deterministic crawler tests

use crate::crawler::{CancelReason, CancelSignal};
use crate::state::LinkDirection;
use crate::wiki::{Continuation, LinkSource, LinksPage, NamespaceSet, QueriedPage, RawLink, TitleQuery};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, (i64, i32)>,
    redirects: HashMap<String, String>,
    links: HashMap<(String, LinkDirection), Vec<RawLink>>,
    failing: HashSet<String>,
    trip: Option<(usize, CancelSignal, CancelReason)>,
}

/// A link source backed by hash maps
///
/// Link listings are served `page_size` at a time with an offset continuation,
/// mimicking the API's pagination.
pub(crate) struct FakeLinkSource {
    state: Mutex<FakeState>,
    page_size: usize,
    fetches: AtomicUsize,
    title_queries: AtomicUsize,
}

impl FakeLinkSource {
    pub fn new() -> Self {
        Self::with_page_size(500)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            page_size,
            fetches: AtomicUsize::new(0),
            title_queries: AtomicUsize::new(0),
        }
    }

    pub fn add_page(&self, page_id: i64, title: &str, namespace: i32) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(title.to_string(), (page_id, namespace));
    }

    pub fn add_redirect(&self, from: &str, to: &str) {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    pub fn set_links(&self, title: &str, direction: LinkDirection, links: Vec<RawLink>) {
        self.state
            .lock()
            .unwrap()
            .links
            .insert((title.to_string(), direction), links);
    }

    /// Main-namespace outbound links
    pub fn set_outbound(&self, title: &str, targets: &[&str]) {
        let links = targets.iter().map(|t| RawLink::new(*t, 0)).collect();
        self.set_links(title, LinkDirection::Outbound, links);
    }

    /// Every link fetch for `title` fails with a network error
    pub fn fail_title(&self, title: &str) {
        self.state.lock().unwrap().failing.insert(title.to_string());
    }

    /// Trips `signal` once `fetches` link pages have been served
    pub fn cancel_after_fetches(&self, fetches: usize, signal: CancelSignal, reason: CancelReason) {
        self.state.lock().unwrap().trip = Some((fetches, signal, reason));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn title_queries(&self) -> usize {
        self.title_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkSource for FakeLinkSource {
    async fn fetch_links_page(
        &self,
        title: &str,
        direction: LinkDirection,
        namespaces: &NamespaceSet,
        cursor: Option<&Continuation>,
    ) -> Result<LinksPage> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(title) {
            return Err(CrawlError::Network {
                url: format!("fake://{}", title),
                message: "connection refused".to_string(),
            });
        }

        let all: Vec<RawLink> = state
            .links
            .get(&(title.to_string(), direction))
            .map(|links| {
                links
                    .iter()
                    .filter(|l| namespaces.contains(l.namespace))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let offset = cursor
            .and_then(|c| c.0.get("offset"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let end = (offset + self.page_size).min(all.len());
        let links = all.get(offset..end).map(<[RawLink]>::to_vec).unwrap_or_default();
        let next = (end < all.len()).then(|| {
            let mut map = serde_json::Map::new();
            map.insert("offset".to_string(), serde_json::json!(end));
            Continuation(map)
        });

        let served = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, signal, reason)) = &state.trip {
            if served >= *after {
                signal.cancel(*reason);
            }
        }

        Ok(LinksPage { links, next })
    }

    async fn query_titles(&self, titles: &[String]) -> Result<TitleQuery> {
        self.title_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        let mut query = TitleQuery::default();
        for title in titles {
            let target = match state.redirects.get(title) {
                Some(to) => {
                    query.redirects.push((title.clone(), to.clone()));
                    to.clone()
                }
                None => title.clone(),
            };
            let page = match state.pages.get(&target) {
                Some(&(page_id, namespace)) => QueriedPage {
                    page_id: Some(page_id),
                    title: target,
                    namespace,
                    ..Default::default()
                },
                None => QueriedPage {
                    title: target,
                    missing: true,
                    ..Default::default()
                },
            };
            query.pages.push(page);
        }
        Ok(query)
    }
}
