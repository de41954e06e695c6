pub mod dom;
pub mod state;
pub mod structured;

use scraper::{ElementRef, Selector};
use serde_json::Value;

pub use dom::DomHeuristicStrategy;
pub use state::EmbeddedStateStrategy;
pub use structured::StructuredDataStrategy;

/// Materialized page handed to the extraction strategies
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub html: String,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, title: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            html: html.into(),
        }
    }
}

/// One listing as found on the page, before normalization.
///
/// The shape depends on the strategy that produced it; only the normalizer
/// looks inside.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJobNode(Value);

impl RawJobNode {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub(crate) fn value(&self) -> &Value {
        &self.0
    }
}

/// A way of finding job listings in a page
pub trait ExtractionStrategy: Send + Sync {
    /// Short name reported in run statistics
    fn name(&self) -> &'static str;

    /// All listings this strategy recognizes, in page order. Malformed units
    /// are skipped, never reported as errors.
    fn extract(&self, page: &PageSnapshot) -> Vec<RawJobNode>;
}

/// Nodes found on a page plus the strategy that found them
#[derive(Debug, Clone)]
pub struct Extraction {
    pub method: &'static str,
    pub nodes: Vec<RawJobNode>,
}

/// Runs strategies in priority order and keeps the first nonempty result
pub struct ExtractionPipeline {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredDataStrategy),
            Box::new(EmbeddedStateStrategy),
            Box::new(DomHeuristicStrategy),
        ])
    }
}

impl ExtractionPipeline {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Append a lower-priority strategy
    pub fn with_strategy(mut self, strategy: Box<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// `None` means no strategy found anything
    pub fn run(&self, page: &PageSnapshot) -> Option<Extraction> {
        for strategy in &self.strategies {
            let nodes = strategy.extract(page);
            if nodes.is_empty() {
                ::log::debug!("Strategy {} found nothing on {}", strategy.name(), page.url);
                continue;
            }
            ::log::info!(
                "Found {} jobs with {} on {}",
                nodes.len(),
                strategy.name(),
                page.url
            );
            return Some(Extraction {
                method: strategy.name(),
                nodes,
            });
        }
        ::log::warn!("No extraction strategy found jobs on {}", page.url);
        None
    }
}

/// Parses a list of selectors, skipping (and logging) invalid ones
pub(crate) fn parse_selectors(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                ::log::debug!("Skipping invalid selector {}: {:?}", s, e);
                None
            }
        })
        .collect()
}

/// First element under `root` matched by any selector, tried in order
pub(crate) fn first_match<'a>(root: ElementRef<'a>, selectors: &[Selector]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|s| root.select(s).next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        nodes: usize,
        calls: Arc<AtomicUsize>,
    }

    impl ExtractionStrategy for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        fn extract(&self, _page: &PageSnapshot) -> Vec<RawJobNode> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (0..self.nodes)
                .map(|i| RawJobNode::new(json!({ "title": format!("{}-{}", self.name, i) })))
                .collect()
        }
    }

    fn counting(name: &'static str, nodes: usize) -> (Box<dyn ExtractionStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Counting {
                name,
                nodes,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[test]
    fn test_first_nonempty_strategy_wins() {
        let (first, first_calls) = counting("first", 1);
        let (second, second_calls) = counting("second", 3);
        let (third, third_calls) = counting("third", 3);
        let pipeline = ExtractionPipeline::new(vec![first, second, third]);

        let page = PageSnapshot::new("https://example/search", "", "<html></html>");
        let extraction = pipeline.run(&page).unwrap();
        assert_eq!(extraction.method, "first");
        assert_eq!(extraction.nodes.len(), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_structured_data_short_circuits_builtin_strategies() {
        let (state, state_calls) = counting("state", 2);
        let (dom, dom_calls) = counting("dom", 2);
        let pipeline = ExtractionPipeline::new(vec![Box::new(StructuredDataStrategy), state, dom]);

        let html = r#"<html><head><script type="application/ld+json">
            {"@type": "JobPosting", "title": "A"}
        </script></head><body></body></html>"#;
        let extraction = pipeline
            .run(&PageSnapshot::new("https://example/search", "", html))
            .unwrap();
        assert_eq!(extraction.method, "structured-data");
        assert_eq!(state_calls.load(Ordering::SeqCst), 0);
        assert_eq!(dom_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_falls_through_to_later_strategy() {
        let (empty, empty_calls) = counting("empty", 0);
        let (full, _) = counting("full", 2);
        let pipeline = ExtractionPipeline::new(vec![empty]).with_strategy(full);

        let extraction = pipeline
            .run(&PageSnapshot::new("https://example/search", "", ""))
            .unwrap();
        assert_eq!(extraction.method, "full");
        assert_eq!(empty_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_empty_is_none() {
        let pipeline = ExtractionPipeline::default();
        assert_eq!(
            pipeline.strategy_names(),
            vec!["structured-data", "embedded-state", "dom-heuristic"]
        );
        let page = PageSnapshot::new("https://example/search", "Empty", "<html><body></body></html>");
        assert!(pipeline.run(&page).is_none());
    }
}
