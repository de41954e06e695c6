use crate::extract::{ExtractionStrategy, PageSnapshot, RawJobNode};
use scraper::{Html, Selector};
use serde_json::Value;

/// Nesting limit when walking structured-data containers
const MAX_DEPTH: usize = 8;

/// Finds `JobPosting` entries in `application/ld+json` blocks
pub struct StructuredDataStrategy;

impl ExtractionStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "structured-data"
    }

    fn extract(&self, page: &PageSnapshot) -> Vec<RawJobNode> {
        let doc = Html::parse_document(&page.html);
        let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
            return Vec::new();
        };

        let mut postings = Vec::new();
        for (index, script) in doc.select(&selector).enumerate() {
            let text = script.text().collect::<String>();
            match serde_json::from_str::<Value>(text.trim()) {
                Ok(value) => collect_postings(&value, &mut postings, 0),
                Err(e) => ::log::debug!("Skipping unparsable ld+json block {}: {}", index, e),
            }
        }

        postings.into_iter().map(RawJobNode::new).collect()
    }
}

/// Walks standalone objects, arrays, `@graph` containers and item lists
fn collect_postings(value: &Value, out: &mut Vec<Value>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect_postings(item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            if is_job_posting(value) {
                out.push(value.clone());
                return;
            }
            if let Some(graph) = map.get("@graph") {
                collect_postings(graph, out, depth + 1);
            }
            if let Some(Value::Array(entries)) = map.get("itemListElement") {
                for entry in entries {
                    match entry.get("item") {
                        Some(item) => collect_postings(item, out, depth + 1),
                        None => collect_postings(entry, out, depth + 1),
                    }
                }
            }
        }
        _ => {}
    }
}

fn is_job_posting(value: &Value) -> bool {
    let matches = |t: &Value| t.as_str().is_some_and(|s| s.eq_ignore_ascii_case("JobPosting"));
    match value.get("@type") {
        Some(Value::Array(types)) => types.iter().any(matches),
        Some(t) => matches(t),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(html: &str) -> Vec<String> {
        StructuredDataStrategy
            .extract(&PageSnapshot::new("https://example/search?q=test", "", html))
            .iter()
            .map(|n| n.value()["title"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn page(scripts: &[&str]) -> String {
        let blocks = scripts
            .iter()
            .map(|s| format!(r#"<script type="application/ld+json">{}</script>"#, s))
            .collect::<String>();
        format!("<html><head>{}</head><body></body></html>", blocks)
    }

    #[test]
    fn test_standalone_and_array() {
        let html = page(&[
            r#"{"@type": "JobPosting", "title": "A"}"#,
            r#"[{"@type": "JobPosting", "title": "B"}, {"@type": "Organization", "name": "X"}]"#,
        ]);
        assert_eq!(titles(&html), vec!["A", "B"]);
    }

    #[test]
    fn test_graph_and_item_list() {
        let html = page(&[
            r#"{"@context": "https://schema.org", "@graph": [{"@type": "WebPage"}, {"@type": ["JobPosting"], "title": "G"}]}"#,
            r#"{"@type": "ItemList", "itemListElement": [
                {"@type": "ListItem", "position": 1, "item": {"@type": "JobPosting", "title": "L1"}},
                {"@type": "JobPosting", "title": "L2"}
            ]}"#,
        ]);
        assert_eq!(titles(&html), vec!["G", "L1", "L2"]);
    }

    #[test]
    fn test_broken_block_is_skipped() {
        let html = page(&[
            r#"{"@type": "JobPosting", "title": "#,
            r#"{"@type": "JobPosting", "title": "Survivor"}"#,
        ]);
        assert_eq!(titles(&html), vec!["Survivor"]);
    }

    #[test]
    fn test_other_script_types_ignored() {
        let html = r#"<html><body><script type="application/json">{"@type": "JobPosting", "title": "No"}</script></body></html>"#;
        assert!(titles(html).is_empty());
    }
}
