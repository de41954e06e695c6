use std::collections::{HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};

/// One listing page to visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    /// 1-based page index
    pub page: u32,
    pub retries: u32,
    /// Key used to keep the same page from being queued twice
    pub key: String,
}

impl PageRequest {
    pub fn new(url: impl Into<String>, page: u32) -> Self {
        let url = url.into();
        Self {
            key: url.clone(),
            url,
            page,
            retries: 0,
        }
    }

    /// The same request, one retry further along
    pub fn retry(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<PageRequest>,
    seen: HashSet<String>,
    in_flight: usize,
    enqueued: usize,
}

/// FIFO of pending page requests shared by all workers.
///
/// Tracks how many dequeued requests are still being handled, so an empty
/// queue only means "done" once nothing in flight can enqueue more.
#[derive(Debug, Default)]
pub struct Frontier {
    state: Mutex<FrontierState>,
    changed: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fresh request; false if its key was already queued this run
    pub async fn push(&self, request: PageRequest) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.seen.insert(request.key.clone()) {
                ::log::debug!("Skipping already queued page: {}", request.url);
                return false;
            }
            state.enqueued += 1;
            state.queue.push_back(request);
        }
        self.changed.notify_waiters();
        true
    }

    /// Queue a request again after a failure, bypassing the seen check
    pub async fn requeue(&self, request: PageRequest) {
        {
            let mut state = self.state.lock().await;
            state.enqueued += 1;
            state.queue.push_back(request);
        }
        self.changed.notify_waiters();
    }

    /// Next request, waiting while other workers may still add some.
    /// `None` once the queue is empty and nothing is in flight.
    pub async fn next(&self) -> Option<PageRequest> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(request) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(request);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }
            changed.await;
        }
    }

    /// Mark a request returned by [`Frontier::next`] as finished
    pub async fn complete(&self) {
        {
            let mut state = self.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Requests still waiting in the queue
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Requests ever queued, retries included
    pub async fn enqueued(&self) -> usize {
        self.state.lock().await.enqueued
    }
}
