//! Blast-radius estimation
//!
//! Predicts how many pages a crawl from a root would touch without crawling:
//! count the root's links, count the links of an evenly spaced sample of its
//! neighbors, and extrapolate the second degree from the average fan-out.
//! Nothing is written to the store.

use crate::config::EstimatorConfig;
use crate::state::LinkDirection;
use crate::wiki::{LinkSource, NamespaceSet, RawLink, ResolvedPage, TitleResolver};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;

/// A link total, possibly cut short by the page budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkCount {
    pub count: u64,
    /// More link pages remained when counting stopped
    pub truncated: bool,
}

/// Link count of one sampled first-degree neighbor
#[derive(Debug, Clone, Serialize)]
pub struct NeighborSample {
    pub title: String,
    pub outbound: LinkCount,
}

/// Expected new pages at one BFS depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegreeEstimate {
    pub depth: u32,
    pub pages: u64,
    /// Pages touched up to and including this depth, root included
    pub cumulative: u64,
}

/// Result of an estimate
#[derive(Debug, Clone, Serialize)]
pub struct BlastRadiusEstimate {
    pub root: ResolvedPage,
    pub outbound: LinkCount,
    pub inbound: LinkCount,
    pub average_fanout: f64,
    pub overlap_discount: f64,
    /// Outbound crawl projection for depths 1 and 2
    pub degrees: Vec<DegreeEstimate>,
    pub samples: Vec<NeighborSample>,
}

/// Sampling-based crawl size predictor
#[derive(Clone)]
pub struct Estimator {
    source: Arc<dyn LinkSource>,
    resolver: TitleResolver,
    config: EstimatorConfig,
    namespaces: NamespaceSet,
}

impl Estimator {
    pub fn new(source: Arc<dyn LinkSource>, config: EstimatorConfig, namespaces: NamespaceSet) -> Self {
        Self {
            resolver: TitleResolver::new(source.clone()),
            source,
            config,
            namespaces,
        }
    }

    /// Estimates the blast radius of crawling from `root_title`
    ///
    /// # Returns
    ///
    /// * `Ok(BlastRadiusEstimate)` - Root info, per-degree projection and samples
    /// * `Err(CrawlError::TitleResolution)` - The root does not exist
    pub async fn estimate(&self, root_title: &str) -> Result<BlastRadiusEstimate> {
        let root = self.resolver.resolve_one(root_title, &self.namespaces).await?;

        let (outbound, neighbors) = self.count_links(&root.title, LinkDirection::Outbound).await?;
        let (inbound, _) = self.count_links(&root.title, LinkDirection::Inbound).await?;

        let mut samples = Vec::new();
        for link in pick_evenly(&neighbors, self.config.sample_size) {
            let (count, _) = self.count_links(&link.title, LinkDirection::Outbound).await?;
            samples.push(NeighborSample {
                title: link.title.clone(),
                outbound: count,
            });
        }

        let average_fanout = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.outbound.count as f64).sum::<f64>() / samples.len() as f64
        };
        let degrees = project(outbound.count, average_fanout, self.config.overlap_discount);

        tracing::info!(
            root = root.title.as_str(),
            outbound = outbound.count,
            inbound = inbound.count,
            sampled = samples.len(),
            average_fanout,
            "Estimated blast radius"
        );

        Ok(BlastRadiusEstimate {
            root,
            outbound,
            inbound,
            average_fanout,
            overlap_discount: self.config.overlap_discount,
            degrees,
            samples,
        })
    }

    /// Counts a page's links, reading at most `max_count_pages` link pages
    async fn count_links(
        &self,
        title: &str,
        direction: LinkDirection,
    ) -> Result<(LinkCount, Vec<RawLink>)> {
        let mut links = Vec::new();
        let mut cursor = None;
        let mut truncated = false;

        for fetched in 1..=self.config.max_count_pages {
            let page = self
                .source
                .fetch_links_page(title, direction, &self.namespaces, cursor.as_ref())
                .await?;
            links.extend(page.links);
            match page.next {
                Some(next) if fetched < self.config.max_count_pages => cursor = Some(next),
                Some(_) => truncated = true,
                None => break,
            }
        }

        let count = LinkCount {
            count: links.len() as u64,
            truncated,
        };
        Ok((count, links))
    }
}

/// Picks up to `k` items spread evenly across `items`
fn pick_evenly<T>(items: &[T], k: usize) -> Vec<&T> {
    if k == 0 || items.is_empty() {
        return Vec::new();
    }
    if items.len() <= k {
        return items.iter().collect();
    }
    (0..k).map(|i| &items[i * items.len() / k]).collect()
}

/// Projects pages per depth from the first-degree count and sampled fan-out
fn project(first_degree: u64, average_fanout: f64, overlap_discount: f64) -> Vec<DegreeEstimate> {
    let second_degree = (average_fanout * first_degree as f64 * overlap_discount).round() as u64;
    vec![
        DegreeEstimate {
            depth: 1,
            pages: first_degree,
            cumulative: 1 + first_degree,
        },
        DegreeEstimate {
            depth: 2,
            pages: second_degree,
            cumulative: 1 + first_degree + second_degree,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testing::FakeLinkSource;
    use crate::wiki::RawLink;

    fn config(sample_size: usize, max_count_pages: u32) -> EstimatorConfig {
        EstimatorConfig {
            sample_size,
            max_count_pages,
            overlap_discount: 0.5,
        }
    }

    #[test]
    fn test_pick_evenly() {
        let items: Vec<u32> = (0..10).collect();
        let picked: Vec<u32> = pick_evenly(&items, 4).into_iter().copied().collect();
        assert_eq!(picked, vec![0, 2, 5, 7]);
        assert_eq!(pick_evenly(&items, 20).len(), 10);
        assert!(pick_evenly(&items, 0).is_empty());
    }

    #[test]
    fn test_project_applies_discount() {
        let degrees = project(10, 4.0, 0.5);
        assert_eq!(degrees[0].pages, 10);
        assert_eq!(degrees[1].pages, 20);
        assert_eq!(degrees[1].cumulative, 31);
    }

    #[tokio::test]
    async fn test_estimate_samples_neighbors() {
        let source = Arc::new(FakeLinkSource::with_page_size(100));
        source.add_page(1, "Root", 0);
        source.set_outbound("Root", &["A", "B"]);
        source.set_links(
            "Root",
            LinkDirection::Inbound,
            vec![RawLink::new("X", 0), RawLink::new("Y", 0), RawLink::new("Z", 0)],
        );
        source.set_outbound("A", &["P", "Q", "R", "S"]);
        source.set_outbound("B", &["P", "Q"]);

        let estimator = Estimator::new(source.clone(), config(10, 4), NamespaceSet::main());
        let estimate = estimator.estimate("Root").await.unwrap();

        assert_eq!(estimate.root.page_id, 1);
        assert_eq!(estimate.outbound.count, 2);
        assert_eq!(estimate.inbound.count, 3);
        assert_eq!(estimate.samples.len(), 2);
        assert!((estimate.average_fanout - 3.0).abs() < f64::EPSILON);
        assert_eq!(estimate.degrees[1].pages, 3);
    }

    #[tokio::test]
    async fn test_count_stops_at_page_budget() {
        let source = Arc::new(FakeLinkSource::with_page_size(2));
        source.add_page(1, "Root", 0);
        source.set_outbound("Root", &["A", "B", "C", "D", "E"]);

        let estimator = Estimator::new(source.clone(), config(1, 2), NamespaceSet::main());
        let estimate = estimator.estimate("Root").await.unwrap();

        assert_eq!(estimate.outbound.count, 4);
        assert!(estimate.outbound.truncated);
        assert!(!estimate.inbound.truncated);
    }

    #[tokio::test]
    async fn test_unknown_root_fails() {
        let source = Arc::new(FakeLinkSource::new());
        let estimator = Estimator::new(source, config(3, 1), NamespaceSet::main());
        assert!(estimator.estimate("Nowhere").await.is_err());
    }
}
