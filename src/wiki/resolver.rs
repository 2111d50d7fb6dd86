//! Batch resolution of raw link titles to canonical pages

use crate::wiki::{LinkSource, NamespaceSet, RawLink, ResolvedPage, TitleQuery};
use crate::{CrawlError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Titles per info query; MediaWiki caps `titles=` at 50 for normal clients
pub const RESOLVE_BATCH_SIZE: usize = 50;

/// Redirect hops followed before a title is given up on
const MAX_REDIRECT_HOPS: usize = 5;

/// Resolves raw titles (including redirects) to canonical page identifiers
#[derive(Clone)]
pub struct TitleResolver {
    source: Arc<dyn LinkSource>,
}

impl TitleResolver {
    pub fn new(source: Arc<dyn LinkSource>) -> Self {
        Self { source }
    }

    /// Resolves a batch of raw links, keyed by the raw title
    ///
    /// Links whose namespace is not allowed are dropped before any request is
    /// made. Titles the API reports missing are dropped silently, as are
    /// redirects that land outside the allowed namespaces.
    pub async fn resolve_titles(
        &self,
        links: &[RawLink],
        allowed: &NamespaceSet,
    ) -> Result<HashMap<String, ResolvedPage>> {
        let mut seen = HashSet::new();
        let titles: Vec<String> = links
            .iter()
            .filter(|link| allowed.contains(link.namespace))
            .filter(|link| seen.insert(link.title.as_str()))
            .map(|link| link.title.clone())
            .collect();

        let mut resolved = HashMap::with_capacity(titles.len());
        for chunk in titles.chunks(RESOLVE_BATCH_SIZE) {
            let query = self.source.query_titles(chunk).await?;
            resolved.extend(resolve_query(chunk, &query, allowed));
        }

        let dropped = titles.len() - resolved.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped unresolvable titles");
        }

        Ok(resolved)
    }

    /// Resolves a single title, failing if it does not exist
    pub async fn resolve_one(&self, title: &str, allowed: &NamespaceSet) -> Result<ResolvedPage> {
        let titles = [title.to_string()];
        let query = self.source.query_titles(&titles).await?;
        resolve_query(&titles, &query, allowed)
            .remove(title)
            .ok_or_else(|| CrawlError::TitleResolution(title.to_string()))
    }
}

/// Maps each requested title through normalization and redirects to a page
pub fn resolve_query(
    titles: &[String],
    query: &TitleQuery,
    allowed: &NamespaceSet,
) -> HashMap<String, ResolvedPage> {
    let normalized: HashMap<&str, &str> = query
        .normalized
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    let redirects: HashMap<&str, &str> = query
        .redirects
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    let pages: HashMap<&str, _> = query.pages.iter().map(|p| (p.title.as_str(), p)).collect();

    let mut out = HashMap::new();
    for title in titles {
        let mut current = normalized
            .get(title.as_str())
            .copied()
            .unwrap_or(title.as_str());
        for _ in 0..MAX_REDIRECT_HOPS {
            match redirects.get(current) {
                Some(target) => current = *target,
                None => break,
            }
        }

        let Some(page) = pages.get(current) else {
            tracing::trace!(title = title.as_str(), "No page entry for title");
            continue;
        };
        let Some(page_id) = page.page_id.filter(|_| !page.missing) else {
            tracing::trace!(title = title.as_str(), "Title is missing");
            continue;
        };
        if !allowed.contains(page.namespace) {
            continue;
        }

        out.insert(
            title.clone(),
            ResolvedPage {
                page_id,
                title: page.title.clone(),
                namespace: page.namespace,
                is_redirect: page.redirect,
                redirect_target_id: None,
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testing::FakeLinkSource;
    use crate::wiki::QueriedPage;

    fn page(id: i64, title: &str, ns: i32) -> QueriedPage {
        QueriedPage {
            page_id: Some(id),
            title: title.to_string(),
            namespace: ns,
            missing: false,
            redirect: false,
        }
    }

    #[test]
    fn test_resolve_query_follows_normalization_and_redirects() {
        let query = TitleQuery {
            normalized: vec![("doggo".to_string(), "Doggo".to_string())],
            redirects: vec![("Doggo".to_string(), "Dog".to_string())],
            pages: vec![page(1, "Dog", 0)],
        };
        let titles = vec!["doggo".to_string()];
        let out = resolve_query(&titles, &query, &NamespaceSet::main());
        assert_eq!(out["doggo"].page_id, 1);
        assert_eq!(out["doggo"].title, "Dog");
    }

    #[test]
    fn test_resolve_query_drops_missing() {
        let query = TitleQuery {
            pages: vec![QueriedPage {
                page_id: None,
                title: "Ghost".to_string(),
                namespace: 0,
                missing: true,
                redirect: false,
            }],
            ..Default::default()
        };
        let out = resolve_query(&["Ghost".to_string()], &query, &NamespaceSet::main());
        assert!(out.is_empty());
    }

    #[test]
    fn test_resolve_query_drops_redirect_into_other_namespace() {
        let query = TitleQuery {
            redirects: vec![("Shortcut".to_string(), "Help:Shortcut".to_string())],
            pages: vec![page(7, "Help:Shortcut", 12)],
            ..Default::default()
        };
        let out = resolve_query(&["Shortcut".to_string()], &query, &NamespaceSet::main());
        assert!(out.is_empty());
    }

    #[test]
    fn test_redirect_loop_terminates() {
        let query = TitleQuery {
            redirects: vec![
                ("A".to_string(), "B".to_string()),
                ("B".to_string(), "A".to_string()),
            ],
            ..Default::default()
        };
        let out = resolve_query(&["A".to_string()], &query, &NamespaceSet::main());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_prefilter_never_queries() {
        let source = Arc::new(FakeLinkSource::new());
        source.add_page(1, "Talk:Dog", 1);
        let resolver = TitleResolver::new(source.clone());

        let out = resolver
            .resolve_titles(&[RawLink::new("Talk:Dog", 1)], &NamespaceSet::main())
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(source.title_queries(), 0);
    }

    #[tokio::test]
    async fn test_resolve_titles_batches() {
        let source = Arc::new(FakeLinkSource::new());
        let links: Vec<RawLink> = (0..120)
            .map(|i| {
                source.add_page(1000 + i, &format!("Page {}", i), 0);
                RawLink::new(format!("Page {}", i), 0)
            })
            .collect();
        let resolver = TitleResolver::new(source.clone());

        let out = resolver
            .resolve_titles(&links, &NamespaceSet::main())
            .await
            .unwrap();

        assert_eq!(out.len(), 120);
        assert_eq!(source.title_queries(), 3);
        assert_eq!(out["Page 7"].page_id, 1007);
    }

    #[tokio::test]
    async fn test_resolve_one_missing_title() {
        let source = Arc::new(FakeLinkSource::new());
        let resolver = TitleResolver::new(source);
        let err = resolver
            .resolve_one("Nowhere", &NamespaceSet::main())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::TitleResolution(_)));
    }
}
