use crate::dedup::{DedupPolicy, Deduplicator};
use crate::results::JobRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Counters for one run, finalized when the run completes
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub pages_processed: usize,
    pub total_saved: usize,
    /// Strategy that produced the most recent nonempty extraction
    pub extraction_method: Option<&'static str>,
    /// Pages served by each strategy
    pub methods: BTreeMap<&'static str, usize>,
    pub empty_pages: usize,
    pub challenges_bypassed: usize,
    pub challenges_failed: usize,
    /// Requests ever queued, retries included
    pub requests_enqueued: usize,
    pub requests_retried: usize,
    pub requests_dropped: usize,
    pub diagnostics_captured: usize,
    /// Sessions handed back because they were blocked
    pub sessions_retired_bad: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Admission {
    dedup: Deduplicator,
    saved: usize,
}

/// State shared by every worker of a run.
///
/// Dedup and the saved counter sit behind one lock so that a batch is checked
/// against both atomically; the cap can never be overshot by workers that
/// finish at the same moment.
#[derive(Debug)]
pub struct RunState {
    cap: usize,
    admission: Mutex<Admission>,
    stats: Mutex<CrawlStats>,
}

impl RunState {
    pub fn new(cap: usize, policy: DedupPolicy) -> Self {
        Self {
            cap,
            admission: Mutex::new(Admission {
                dedup: Deduplicator::new(policy),
                saved: 0,
            }),
            stats: Mutex::new(CrawlStats::default()),
        }
    }

    /// Keeps the records that are new and fit under the cap, counting them
    /// as saved. The caller must deliver every returned record.
    pub async fn admit(&self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        let mut admission = self.admission.lock().await;
        let mut accepted = Vec::new();
        for record in records {
            if admission.saved >= self.cap {
                break;
            }
            if !admission.dedup.accept(&record) {
                ::log::debug!("Skipping duplicate job: {:?}", record.title);
                continue;
            }
            admission.saved += 1;
            accepted.push(record);
        }
        accepted
    }

    /// Undo [`RunState::admit`] for records that were never delivered
    pub async fn release(&self, records: &[JobRecord]) {
        let mut admission = self.admission.lock().await;
        for record in records {
            admission.dedup.forget(record);
            admission.saved = admission.saved.saturating_sub(1);
        }
    }

    pub async fn saved(&self) -> usize {
        self.admission.lock().await.saved
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub async fn cap_reached(&self) -> bool {
        self.saved().await >= self.cap
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut CrawlStats),
    {
        let mut stats = self.stats.lock().await;
        f(&mut stats);
    }

    /// Final statistics; call once, after every worker has stopped
    pub async fn finish(&self, elapsed: Duration) -> CrawlStats {
        let mut stats = self.stats.lock().await.clone();
        stats.total_saved = self.saved().await;
        stats.elapsed = elapsed;
        stats
    }
}
