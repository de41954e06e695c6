use crate::results::JobRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do with records that carry neither a job id nor a url
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Fall back to the title as the identity key
    #[default]
    ByTitle,
    /// Never dedup such records
    KeepUntitledKeys,
}

/// Tracks identity keys seen during one run
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    policy: DedupPolicy,
}

impl Deduplicator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            seen: HashSet::new(),
            policy,
        }
    }

    /// Returns true and records the key if it has not been seen before
    pub fn is_new(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.to_string());
        true
    }

    /// Identity key of a record: job id, then url, then (policy permitting) title
    pub fn identity_key(&self, record: &JobRecord) -> Option<String> {
        if let Some(id) = record.job_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(format!("id:{}", id));
        }
        if let Some(url) = record.url.as_deref().filter(|s| !s.is_empty()) {
            return Some(format!("url:{}", url));
        }
        match self.policy {
            DedupPolicy::ByTitle => record.title.as_ref().map(|t| format!("title:{}", t)),
            DedupPolicy::KeepUntitledKeys => None,
        }
    }

    /// Whether a record should be emitted; registers its key as a side effect
    pub fn accept(&mut self, record: &JobRecord) -> bool {
        match self.identity_key(record) {
            Some(key) => self.is_new(&key),
            None => true,
        }
    }

    /// Unregister a record accepted earlier, so it can be accepted again
    pub fn forget(&mut self, record: &JobRecord) {
        if let Some(key) = self.identity_key(record) {
            self.seen.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>, url: Option<&str>, title: &str) -> JobRecord {
        let mut record = JobRecord::empty();
        record.job_id = id.map(str::to_string);
        record.url = url.map(str::to_string);
        record.title = Some(title.to_string());
        record
    }

    #[test]
    fn test_is_new_true_then_false() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.is_new("J1"));
        assert!(!dedup.is_new("J1"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_job_id_wins_regardless_of_title() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.accept(&record(Some("J1"), None, "First title")));
        assert!(!dedup.accept(&record(Some("J1"), None, "Renamed title")));
    }

    #[test]
    fn test_url_used_when_id_missing() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.accept(&record(None, Some("https://x/jobs/1"), "A")));
        assert!(!dedup.accept(&record(None, Some("https://x/jobs/1"), "B")));
        assert!(dedup.accept(&record(None, Some("https://x/jobs/2"), "A")));
    }

    #[test]
    fn test_forget_allows_reacceptance() {
        let mut dedup = Deduplicator::default();
        let job = record(Some("J1"), None, "A");
        assert!(dedup.accept(&job));
        dedup.forget(&job);
        assert!(dedup.is_empty());
        assert!(dedup.accept(&job));
    }

    #[test]
    fn test_title_fallback_policy() {
        let mut by_title = Deduplicator::new(DedupPolicy::ByTitle);
        assert!(by_title.accept(&record(None, None, "Same")));
        assert!(!by_title.accept(&record(None, None, "Same")));

        let mut keep = Deduplicator::new(DedupPolicy::KeepUntitledKeys);
        assert!(keep.accept(&record(None, None, "Same")));
        assert!(keep.accept(&record(None, None, "Same")));
        assert!(keep.is_empty());
    }

    #[test]
    fn test_id_and_title_keys_do_not_collide() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.accept(&record(Some("Same"), None, "x")));
        assert!(dedup.accept(&record(None, None, "Same")));
    }
}
