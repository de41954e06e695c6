use crate::browser::{Browser, Session, SessionProvider};
use crate::challenge::{ChallengeResolver, ChallengeState, humanize};
use crate::config::HarvestConfig;
use crate::crawlers::frontier::{Frontier, PageRequest};
use crate::crawlers::state::{CrawlStats, RunState};
use crate::diagnostics::{DiagnosticReason, DiagnosticStore};
use crate::errors::{BrowserError, HarvestError};
use crate::extract::{ExtractionPipeline, PageSnapshot};
use crate::normalize::RecordNormalizer;
use crate::pagination::PaginationController;
use crate::results::JobRecord;
use crate::sink::RecordSink;
use crate::utils::jitter;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Pixels scrolled per settle step
const SCROLL_STEP: i64 = 500;

/// Elements whose presence means listings have rendered
const LISTING_MARKERS: &str = r#"script[type="application/ld+json"], [data-test="JobTile"], [data-test="job-tile"], article"#;

const LISTING_POLLS: u32 = 10;

/// Drives a harvest run: a pool of workers pulling page requests from a
/// shared frontier, each with its own browser session.
pub struct Orchestrator {
    config: HarvestConfig,
    sessions: Arc<dyn SessionProvider>,
    sink: Arc<dyn RecordSink>,
    pipeline: ExtractionPipeline,
}

/// Everything a worker needs, shared across the pool
struct WorkerContext {
    config: HarvestConfig,
    sessions: Arc<dyn SessionProvider>,
    sink: Arc<dyn RecordSink>,
    pipeline: ExtractionPipeline,
    resolver: ChallengeResolver,
    pagination: PaginationController,
    diagnostics: DiagnosticStore,
    frontier: Frontier,
    run: RunState,
    sessions_opened: AtomicUsize,
    last_session_error: Mutex<Option<BrowserError>>,
}

impl Orchestrator {
    /// Fails with a configuration error before anything is spawned
    pub fn new(
        config: HarvestConfig,
        sessions: Arc<dyn SessionProvider>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions,
            sink,
            pipeline: ExtractionPipeline::default(),
        })
    }

    /// Replace the default extraction pipeline
    pub fn with_pipeline(mut self, pipeline: ExtractionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Run until the frontier drains or the results cap is reached.
    ///
    /// Only a run that never obtained a browser session fails; per-page
    /// problems are retried, dropped or diagnosed and show up in the stats.
    pub async fn run(self) -> Result<CrawlStats, HarvestError> {
        let started = Instant::now();
        let config = self.config;
        ::log::info!(
            "Starting harvest at {} (results {}, pages {}, concurrency {})",
            config.start_url,
            config.results_wanted,
            config.max_pages,
            config.max_concurrency
        );

        let ctx = Arc::new(WorkerContext {
            resolver: ChallengeResolver::new(config.challenge.clone()),
            pagination: PaginationController::new(config.pagination.clone(), config.max_pages),
            diagnostics: DiagnosticStore::new(config.diagnostics_dir.clone()),
            frontier: Frontier::new(),
            run: RunState::new(config.results_wanted, config.dedup_policy),
            sessions_opened: AtomicUsize::new(0),
            last_session_error: Mutex::new(None),
            sessions: self.sessions,
            sink: self.sink,
            pipeline: self.pipeline,
            config,
        });

        let seeds = std::iter::once(&ctx.config.start_url).chain(&ctx.config.extra_start_urls);
        for url in seeds {
            ctx.frontier.push(PageRequest::new(url.clone(), 1)).await;
        }

        let workers = spawn_workers(&ctx);
        for (worker_id, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                ::log::error!("Worker {} terminated abnormally: {}", worker_id, e);
            }
        }

        let pending = ctx.frontier.pending().await;
        if ctx.sessions_opened.load(Ordering::SeqCst) == 0 && pending > 0 {
            let cause = ctx
                .last_session_error
                .lock()
                .await
                .take()
                .unwrap_or_else(|| BrowserError::Connect("no session available".to_string()));
            ::log::error!("No browser session could be opened, aborting run");
            return Err(HarvestError::NoSession(cause));
        }
        if pending > 0 {
            ::log::warn!("{} request(s) left unprocessed, no worker could take them", pending);
            ctx.run.update(|s| s.requests_dropped += pending).await;
        }

        let enqueued = ctx.frontier.enqueued().await;
        let retired_bad = ctx.sessions.retired_bad();
        ctx.run
            .update(|s| {
                s.requests_enqueued = enqueued;
                s.sessions_retired_bad = retired_bad;
            })
            .await;

        let stats = ctx.run.finish(started.elapsed()).await;
        ::log::info!(
            "Harvest complete - saved {} jobs from {} pages in {:.2} seconds",
            stats.total_saved,
            stats.pages_processed,
            stats.elapsed.as_secs_f64()
        );
        if stats.total_saved == 0 {
            ::log::warn!("No jobs were saved; the site may have blocked access or changed its layout");
        }
        Ok(stats)
    }
}

/// Spawns one worker per concurrency slot
fn spawn_workers(ctx: &Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    (0..ctx.config.max_concurrency)
        .map(|worker_id| {
            let ctx = Arc::clone(ctx);
            ::log::trace!("Spawning worker {}", worker_id);
            tokio::spawn(async move { worker_processing_loop(worker_id, ctx).await })
        })
        .collect()
}

/// Main processing loop for a worker
///
/// Pulls requests until the frontier drains. The browser session is acquired
/// lazily, so idle workers never open one.
async fn worker_processing_loop(worker_id: usize, ctx: Arc<WorkerContext>) {
    ::log::debug!("Worker {} starting processing loop", worker_id);
    let mut session: Option<Session> = None;

    while let Some(request) = ctx.frontier.next().await {
        if ctx.run.cap_reached().await {
            ::log::debug!(
                "Worker {} dropping {}: result cap reached",
                worker_id,
                request.url
            );
            ctx.frontier.complete().await;
            continue;
        }

        if session.is_none() {
            match ctx.sessions.acquire(worker_id).await {
                Ok(acquired) => {
                    ctx.sessions_opened.fetch_add(1, Ordering::SeqCst);
                    ::log::debug!("Worker {} opened session {}", worker_id, acquired.id);
                    session = Some(acquired);
                }
                Err(e) => {
                    ::log::error!("Worker {} could not open a browser session: {}", worker_id, e);
                    *ctx.last_session_error.lock().await = Some(e);
                    // Give the request back without spending a retry
                    ctx.frontier.requeue(request).await;
                    ctx.frontier.complete().await;
                    break;
                }
            }
        }
        let Some(active) = session.as_mut() else {
            ctx.frontier.complete().await;
            continue;
        };

        let outcome = match timeout(
            ctx.config.page_timeout(),
            handle_page(&ctx, active, &request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(HarvestError::PageTimeout {
                url: request.url.clone(),
            }),
        };
        active.usage += 1;

        match outcome {
            Ok(Some(harvest)) => {
                finish_page(&ctx, active.browser.as_ref(), &request, harvest).await
            }
            Ok(None) => {}
            Err(e) => {
                if matches!(
                    e,
                    HarvestError::Blocked { .. } | HarvestError::Browser(BrowserError::SessionLost)
                ) {
                    active.mark_bad();
                }
                retry_or_drop(&ctx, worker_id, request, e).await;
            }
        }

        if active.is_spent(ctx.config.session_max_usage) {
            if let Some(spent) = session.take() {
                ::log::debug!("Worker {} retiring session {:?}", worker_id, spent);
                ctx.sessions.release(spent).await;
            }
        }

        ctx.frontier.complete().await;
    }

    if let Some(remaining) = session.take() {
        ctx.sessions.release(remaining).await;
    }
    ::log::debug!("Worker {} completed processing loop", worker_id);
}

/// Requeue a failed request while it has retries left, otherwise drop it
async fn retry_or_drop(ctx: &WorkerContext, worker_id: usize, request: PageRequest, error: HarvestError) {
    if error.is_transient() && request.retries < ctx.config.max_request_retries {
        ::log::warn!(
            "Worker {} failed on {} ({}), retry {}/{}",
            worker_id,
            request.url,
            error,
            request.retries + 1,
            ctx.config.max_request_retries
        );
        ctx.run.update(|s| s.requests_retried += 1).await;
        ctx.frontier.requeue(request.retry()).await;
    } else {
        ::log::error!(
            "Worker {} dropping {} after {} retries: {}",
            worker_id,
            request.url,
            request.retries,
            error
        );
        ctx.run.update(|s| s.requests_dropped += 1).await;
    }
}

/// What a visited page yielded, handed over once the timed visit is over
struct PageHarvest {
    records: Vec<JobRecord>,
    /// Strategy that found the records; `None` for an empty page
    method: Option<&'static str>,
    next: Option<PageRequest>,
}

/// Visit one listing page: navigate, clear challenges, extract and normalize.
///
/// Runs under the page timeout, so it leaves the shared run state alone;
/// `None` means the page was abandoned to an unresolved challenge.
async fn handle_page(
    ctx: &WorkerContext,
    session: &mut Session,
    request: &PageRequest,
) -> Result<Option<PageHarvest>, HarvestError> {
    ::log::info!("Processing page {}: {}", request.page, request.url);
    let browser = session.browser.as_ref();

    browser
        .goto(&request.url, ctx.config.navigation_timeout())
        .await
        .map_err(|source| HarvestError::Navigation {
            url: request.url.clone(),
            source,
        })?;

    let challenge = ctx.resolver.resolve(browser).await?;
    if !challenge.state.is_cleared() {
        ctx.run.update(|s| s.challenges_failed += 1).await;
        let snapshot = take_snapshot(browser, request).await?;
        capture_diagnostic(ctx, &snapshot, request.page, DiagnosticReason::ChallengeUnresolved)
            .await;
        ::log::error!(
            "{}",
            HarvestError::ChallengeUnresolved {
                url: request.url.clone(),
                cycles: challenge.cycles,
            }
        );
        return Ok(None);
    }
    if challenge.state == ChallengeState::Bypassed {
        ctx.run.update(|s| s.challenges_bypassed += 1).await;
    }
    if challenge.signals.blocked {
        return Err(HarvestError::Blocked {
            url: request.url.clone(),
        });
    }

    settle(ctx, browser).await;
    let snapshot = take_snapshot(browser, request).await?;

    let (records, method) = match ctx.pipeline.run(&snapshot) {
        Some(extraction) => {
            let normalizer = RecordNormalizer::new(&request.url);
            let records = extraction
                .nodes
                .iter()
                .filter_map(|node| normalizer.normalize(node))
                .filter(|record| {
                    if !record.has_title() {
                        ::log::debug!("Discarding record without a title: {:?}", record.job_id);
                    }
                    record.has_title()
                })
                .collect::<Vec<_>>();
            (records, Some(extraction.method))
        }
        None => {
            ::log::warn!("No jobs found on page {}: {}", request.page, request.url);
            capture_diagnostic(ctx, &snapshot, request.page, DiagnosticReason::NoData).await;
            (Vec::new(), None)
        }
    };

    let cap_reached = ctx.run.cap_reached().await;
    let next = ctx.pagination.next_request(&snapshot.html, request, cap_reached);

    if method.is_some() {
        session.mark_good();
    }
    Ok(Some(PageHarvest {
        records,
        method,
        next,
    }))
}

/// Admit and deliver a page's records, then queue the following page.
///
/// Runs outside the page timeout: records counted as saved are either
/// delivered or released again.
async fn finish_page(
    ctx: &WorkerContext,
    browser: &dyn Browser,
    request: &PageRequest,
    harvest: PageHarvest,
) {
    let accepted = ctx.run.admit(harvest.records).await;
    let mut emitted = accepted.len();
    if emitted > 0 {
        if let Err(e) = ctx.sink.push_batch(accepted).await {
            ::log::error!("Failed to emit records from {}: {}", request.url, e);
            emitted -= e.records.len();
            ctx.run.release(&e.records).await;
        }
    }
    ::log::info!(
        "Saved {} new jobs from page {} ({}/{} total)",
        emitted,
        request.page,
        ctx.run.saved().await,
        ctx.run.cap()
    );

    let method = harvest.method;
    ctx.run
        .update(|s| {
            s.pages_processed += 1;
            match method {
                Some(method) => {
                    s.extraction_method = Some(method);
                    *s.methods.entry(method).or_default() += 1;
                }
                None => s.empty_pages += 1,
            }
        })
        .await;

    let Some(next) = harvest.next else {
        return;
    };
    if ctx.run.cap_reached().await {
        ::log::debug!("Result cap reached, not following page {}", next.page);
        return;
    }
    if ctx.frontier.push(next).await {
        browser
            .wait(jitter(ctx.config.settle.min_delay_ms, ctx.config.settle.max_delay_ms))
            .await;
    }
}

async fn take_snapshot(browser: &dyn Browser, request: &PageRequest) -> Result<PageSnapshot, HarvestError> {
    let title = browser.title().await?;
    let html = browser.source().await?;
    Ok(PageSnapshot::new(request.url.clone(), title, html))
}

/// Scroll through the page so lazily rendered listings load, then pause.
/// Failures here never fail the page.
async fn settle(ctx: &WorkerContext, browser: &dyn Browser) {
    let settle = &ctx.config.settle;
    wait_for_listings(browser).await;
    if ctx.config.challenge.humanize {
        if let Err(e) = humanize(browser).await {
            ::log::debug!("Human-like movement failed: {}", e);
        }
    }

    let mut scrolled = 0;
    for _ in 0..settle.scroll_steps {
        if let Err(e) = browser.scroll_by(SCROLL_STEP).await {
            ::log::debug!("Scrolling failed: {}", e);
            break;
        }
        scrolled += SCROLL_STEP;
        browser.wait(jitter(300, 700)).await;
    }
    if scrolled > 0 {
        let _ = browser.scroll_by(-scrolled).await;
    }

    browser
        .wait(jitter(settle.min_delay_ms, settle.max_delay_ms))
        .await;
}

/// Poll until something that looks like a listing has rendered
async fn wait_for_listings(browser: &dyn Browser) {
    for _ in 0..LISTING_POLLS {
        match browser.count(LISTING_MARKERS).await {
            Ok(0) => browser.wait(Duration::from_millis(500)).await,
            Ok(found) => {
                ::log::debug!("{} listing elements rendered", found);
                return;
            }
            Err(e) => {
                ::log::debug!("Counting listing elements failed: {}", e);
                return;
            }
        }
    }
    ::log::debug!("No listing elements rendered, extracting anyway");
}

async fn capture_diagnostic(
    ctx: &WorkerContext,
    snapshot: &PageSnapshot,
    page: u32,
    reason: DiagnosticReason,
) {
    match ctx.diagnostics.capture(snapshot, page, reason).await {
        Ok(_) => ctx.run.update(|s| s.diagnostics_captured += 1).await,
        Err(e) => ::log::error!("Failed to capture diagnostics for {}: {}", snapshot.url, e),
    }
}
