use crate::challenge::ChallengeSignals;
use crate::errors::HarvestError;
use crate::extract::PageSnapshot;
use crate::utils::sanitize_filename;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Elements counted in a structural summary
const COUNTED: &[(&str, &str)] = &[
    ("scripts", "script"),
    ("ld_json", r#"script[type="application/ld+json"]"#),
    ("inline_scripts", "script:not([src])"),
    ("articles", "article"),
    ("sections", "section"),
    ("links", "a[href]"),
    ("job_links", r#"a[href*="/jobs/"]"#),
    ("iframes", "iframe"),
    ("forms", "form"),
    ("buttons", "button"),
];

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReason {
    NoData,
    ChallengeUnresolved,
}

/// What the page looked like, for offline inspection
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub key: String,
    pub url: String,
    pub page: u32,
    pub title: String,
    pub reason: DiagnosticReason,
    pub html_bytes: usize,
    pub element_counts: BTreeMap<&'static str, usize>,
    pub challenge: ChallengeSignals,
    pub captured_at: DateTime<Utc>,
}

impl PageSummary {
    pub fn new(snapshot: &PageSnapshot, page: u32, reason: DiagnosticReason) -> Self {
        let doc = Html::parse_document(&snapshot.html);
        let element_counts = COUNTED
            .iter()
            .filter_map(|(name, sel)| {
                Selector::parse(sel)
                    .ok()
                    .map(|s| (*name, doc.select(&s).count()))
            })
            .collect();

        Self {
            key: snapshot_key(&snapshot.url, page),
            url: snapshot.url.clone(),
            page,
            title: snapshot.title.clone(),
            reason,
            html_bytes: snapshot.html.len(),
            element_counts,
            challenge: ChallengeSignals::detect(&snapshot.title, &snapshot.html),
            captured_at: Utc::now(),
        }
    }
}

/// Stable key for a page's snapshot
pub fn snapshot_key(url: &str, page: u32) -> String {
    format!("page-{:03}-{}", page, sanitize_filename(url))
}

/// Writes page markup plus a JSON summary when extraction comes up empty
#[derive(Debug, Clone, Default)]
pub struct DiagnosticStore {
    dir: Option<PathBuf>,
}

impl DiagnosticStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Summarize the page and, if a directory is configured, persist
    /// `<key>.html` and `<key>.json`. Returns the summary either way.
    pub async fn capture(
        &self,
        snapshot: &PageSnapshot,
        page: u32,
        reason: DiagnosticReason,
    ) -> Result<PageSummary, HarvestError> {
        let summary = PageSummary::new(snapshot, page, reason);
        ::log::warn!(
            "Capturing diagnostic snapshot {} ({:?}): title={:?} counts={:?}",
            summary.key,
            reason,
            summary.title,
            summary.element_counts
        );

        let Some(dir) = &self.dir else {
            return Ok(summary);
        };
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(format!("{}.html", summary.key)), &snapshot.html).await?;
        let json = serde_json::to_vec_pretty(&summary)?;
        tokio::fs::write(dir.join(format!("{}.json", summary.key)), json).await?;
        ::log::debug!("Snapshot written to {}", dir.display());

        Ok(summary)
    }
}
