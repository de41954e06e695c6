use crate::extract::{ExtractionStrategy, PageSnapshot, RawJobNode};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

/// Where known sites keep their job array inside a state payload
const JOB_ARRAY_PATHS: &[&str] = &[
    "/searchResults/jobs",
    "/jobSearchResults/jobs",
    "/props/pageProps/jobs",
    "/props/pageProps/searchResults/jobs",
    "/data/jobs",
    "/data/search/jobs",
    "/state/jobsSearch/jobs",
    "/jobs",
    "/results",
];

/// Keys that may hold a job array anywhere in a payload
const JOB_ARRAY_KEYS: &[&str] = &["jobs", "results", "jobPostings", "jobTiles", "searchResults"];

/// Keys whose raw `"key": [...]` or `"key": {...}` fragment is worth parsing
const FRAGMENT_KEYS: &str = r#""(jobs|searchResults|jobSearchResults|jobPostings)"\s*:\s*"#;

const MAX_DEPTH: usize = 8;

/// Finds job arrays in application state embedded in inline scripts
pub struct EmbeddedStateStrategy;

impl ExtractionStrategy for EmbeddedStateStrategy {
    fn name(&self) -> &'static str {
        "embedded-state"
    }

    fn extract(&self, page: &PageSnapshot) -> Vec<RawJobNode> {
        let scripts = inline_scripts(&page.html);
        let (Ok(assignment), Ok(fragment)) = (
            Regex::new(r"window\.(__[A-Za-z0-9_]+__|[A-Za-z_$][A-Za-z0-9_$]*State)\s*=\s*"),
            Regex::new(FRAGMENT_KEYS),
        ) else {
            return Vec::new();
        };

        for script in &scripts {
            for payload in candidate_payloads(script, &assignment, &fragment) {
                if let Some(jobs) = find_job_array(&payload) {
                    ::log::debug!("Found {} jobs in embedded state", jobs.len());
                    return jobs.into_iter().map(RawJobNode::new).collect();
                }
            }
        }
        Vec::new()
    }
}

struct InlineScript {
    id: Option<String>,
    kind: Option<String>,
    text: String,
}

/// Scripts with a body and no external source
fn inline_scripts(html: &str) -> Vec<InlineScript> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("script:not([src])") else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter(|s| s.value().attr("type") != Some("application/ld+json"))
        .map(|s| InlineScript {
            id: s.value().attr("id").map(str::to_string),
            kind: s.value().attr("type").map(str::to_string),
            text: s.text().collect::<String>(),
        })
        .filter(|s| !s.text.trim().is_empty())
        .collect()
}

/// JSON payloads a script may carry, most explicit first
fn candidate_payloads(script: &InlineScript, assignment: &Regex, fragment: &Regex) -> Vec<Value> {
    let mut payloads = Vec::new();

    // Hydration payloads are plain JSON documents
    let is_json_block = script.id.as_deref() == Some("__NEXT_DATA__")
        || script.kind.as_deref() == Some("application/json");
    if is_json_block {
        if let Ok(value) = serde_json::from_str::<Value>(script.text.trim()) {
            payloads.push(value);
        }
    }

    for m in assignment.find_iter(&script.text) {
        if let Some(value) = parse_json_at(&script.text, m.end()) {
            payloads.push(value);
        }
    }

    for caps in fragment.captures_iter(&script.text) {
        let (Some(key), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        if let Some(value) = parse_json_at(&script.text, whole.end()) {
            let mut wrapper = Map::new();
            wrapper.insert(key.as_str().to_string(), value);
            payloads.push(Value::Object(wrapper));
        }
    }

    payloads
}

/// Parses the first JSON value starting at `start`, ignoring whatever follows
fn parse_json_at(text: &str, start: usize) -> Option<Value> {
    let rest = text.get(start..)?.trim_start();
    if !rest.starts_with(['{', '[']) {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            ::log::debug!("Embedded payload did not parse: {}", e);
            None
        }
        None => None,
    }
}

/// Known paths first, then a bounded search for a job-shaped array
fn find_job_array(payload: &Value) -> Option<Vec<Value>> {
    for path in JOB_ARRAY_PATHS {
        if let Some(Value::Array(items)) = payload.pointer(path) {
            let jobs = job_objects(items);
            if !jobs.is_empty() {
                return Some(jobs);
            }
        }
    }
    search_job_array(payload, 0)
}

fn search_job_array(value: &Value, depth: usize) -> Option<Vec<Value>> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in JOB_ARRAY_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    let jobs = job_objects(items);
                    if !jobs.is_empty() {
                        return Some(jobs);
                    }
                }
            }
            map.values().find_map(|v| search_job_array(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| search_job_array(v, depth + 1)),
        _ => None,
    }
}

/// Objects in the array that carry a title
fn job_objects(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter(|item| {
            ["title", "jobTitle"]
                .iter()
                .any(|k| item.get(*k).is_some_and(|v| v.is_string()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(html: &str) -> Vec<String> {
        EmbeddedStateStrategy
            .extract(&PageSnapshot::new("https://example/search", "", html))
            .iter()
            .map(|n| n.value()["title"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_next_data_payload() {
        let html = r#"<html><body><script id="__NEXT_DATA__" type="application/json">
            {"props": {"pageProps": {"jobs": [{"title": "Next A"}, {"title": "Next B"}]}}}
        </script></body></html>"#;
        assert_eq!(titles(html), vec!["Next A", "Next B"]);
    }

    #[test]
    fn test_global_assignment() {
        let html = r#"<html><body><script>
            window.__INITIAL_STATE__ = {"searchResults": {"jobs": [{"ciphertext": "~01", "title": "Assigned"}]}};
            window.other = 1;
        </script></body></html>"#;
        assert_eq!(titles(html), vec!["Assigned"]);
    }

    #[test]
    fn test_raw_fragment() {
        let html = r#"<html><body><script>
            var cfg = init({ flags: true, "jobs": [{"title": "Fragment"}], more: stuff });
        </script></body></html>"#;
        assert_eq!(titles(html), vec!["Fragment"]);
    }

    #[test]
    fn test_nested_alternate_key() {
        let html = r#"<html><body><script>
            window.__APOLLO_STATE__ = {"root": {"page": {"jobPostings": [{"jobTitle": "Deep", "title": "Deep"}]}}};
        </script></body></html>"#;
        assert_eq!(titles(html), vec!["Deep"]);
    }

    #[test]
    fn test_external_and_unparsable_scripts_ignored() {
        let html = r#"<html><body>
            <script src="/app.js">window.__INITIAL_STATE__ = {"jobs": [{"title": "External"}]};</script>
            <script>window.__NUXT__ = (function(a){ return {jobs: [a]} })("x");</script>
        </body></html>"#;
        assert!(titles(html).is_empty());
    }

    #[test]
    fn test_arrays_without_titles_are_not_jobs() {
        let html = r#"<html><body><script>
            window.__INITIAL_STATE__ = {"results": [{"id": 1}, {"id": 2}]};
        </script></body></html>"#;
        assert!(titles(html).is_empty());
    }
}
