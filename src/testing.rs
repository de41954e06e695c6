//! In-memory browser and session provider used by unit tests

use crate::browser::{Browser, Session, SessionProvider, SessionQuality};
use crate::errors::BrowserError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub title: String,
    pub html: String,
}

impl MockPage {
    pub fn new(title: &str, html: &str) -> Self {
        Self {
            title: title.to_string(),
            html: html.to_string(),
        }
    }
}

/// Maps a navigated URL to the page served for it
pub type Site = Arc<dyn Fn(&str) -> Result<MockPage, BrowserError> + Send + Sync>;

/// Calls observed across every browser sharing the log
#[derive(Debug, Default)]
pub struct MockLog {
    pub gotos: Vec<String>,
    pub title_calls: usize,
    pub frame_clicks: usize,
    pub closed: usize,
}

pub struct MockBrowser {
    current: Mutex<MockPage>,
    site: Option<Site>,
    frames: Mutex<Vec<String>>,
    swap: Mutex<Option<(u32, MockPage)>>,
    log: Arc<Mutex<MockLog>>,
}

impl MockBrowser {
    /// A browser already showing one page, with no navigation behavior
    pub fn with_page(title: &str, html: &str) -> Self {
        Self {
            current: Mutex::new(MockPage::new(title, html)),
            site: None,
            frames: Mutex::new(Vec::new()),
            swap: Mutex::new(None),
            log: Arc::default(),
        }
    }

    pub fn with_site(site: Site, log: Arc<Mutex<MockLog>>) -> Self {
        Self {
            current: Mutex::new(MockPage::default()),
            site: Some(site),
            frames: Mutex::new(Vec::new()),
            swap: Mutex::new(None),
            log,
        }
    }

    /// Serve `title`/`html` once `idle_waits` idle waits have passed
    pub fn clear_challenge_after(&self, idle_waits: u32, title: &str, html: &str) {
        *self.swap.lock().unwrap() = Some((idle_waits, MockPage::new(title, html)));
    }

    /// Make frames matching `selector` clickable
    pub fn add_frame(&self, selector: &str) {
        self.frames.lock().unwrap().push(selector.to_string());
    }

    pub fn title_calls(&self) -> usize {
        self.log.lock().unwrap().title_calls
    }

    pub fn frame_clicks(&self) -> usize {
        self.log.lock().unwrap().frame_clicks
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.log.lock().unwrap().gotos.push(url.to_string());
        if let Some(site) = &self.site {
            let page = site(url)?;
            *self.current.lock().unwrap() = page;
        }
        Ok(())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.log.lock().unwrap().title_calls += 1;
        Ok(self.current.lock().unwrap().title.clone())
    }

    async fn source(&self) -> Result<String, BrowserError> {
        Ok(self.current.lock().unwrap().html.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        if script.contains("readyState") {
            Ok(json!("complete"))
        } else if script.contains("innerWidth") {
            Ok(json!([1280, 720]))
        } else {
            Ok(Value::Null)
        }
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        let html = self.current.lock().unwrap().html.clone();
        let selector =
            Selector::parse(selector).map_err(|e| BrowserError::Command(e.to_string()))?;
        Ok(Html::parse_document(&html).select(&selector).count())
    }

    async fn click(&self, _selector: &str) -> Result<bool, BrowserError> {
        Ok(false)
    }

    async fn click_in_frame(
        &self,
        frame_selector: &str,
        _targets: &[&str],
    ) -> Result<bool, BrowserError> {
        let known = self
            .frames
            .lock()
            .unwrap()
            .iter()
            .any(|f| f == frame_selector);
        if known {
            self.log.lock().unwrap().frame_clicks += 1;
        }
        Ok(known)
    }

    async fn pointer_move(&self, _x: i64, _y: i64) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn scroll_by(&self, _dy: i64) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }

    async fn wait(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }

    async fn wait_for_idle(&self, _timeout: Duration) -> Result<(), BrowserError> {
        let mut swap = self.swap.lock().unwrap();
        if let Some((remaining, _)) = swap.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                if let Some((_, page)) = swap.take() {
                    *self.current.lock().unwrap() = page;
                }
            }
        }
        Ok(())
    }
}

/// Hands out [`MockBrowser`]s that all serve the same site
pub struct MockSessions {
    site: Site,
    log: Arc<Mutex<MockLog>>,
    fail_acquire: bool,
    acquired: AtomicUsize,
    released: Mutex<Vec<SessionQuality>>,
}

impl MockSessions {
    pub fn new<F>(site: F) -> Self
    where
        F: Fn(&str) -> Result<MockPage, BrowserError> + Send + Sync + 'static,
    {
        Self {
            site: Arc::new(site),
            log: Arc::default(),
            fail_acquire: false,
            acquired: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every acquire fails
    pub fn unavailable() -> Self {
        Self {
            fail_acquire: true,
            ..Self::new(|_| Ok(MockPage::default()))
        }
    }

    pub fn gotos(&self) -> Vec<String> {
        self.log.lock().unwrap().gotos.clone()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<SessionQuality> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionProvider for MockSessions {
    async fn acquire(&self, _worker_id: usize) -> Result<Session, BrowserError> {
        if self.fail_acquire {
            return Err(BrowserError::Connect("connection refused".to_string()));
        }
        let id = self.acquired.fetch_add(1, Ordering::SeqCst);
        let browser = MockBrowser::with_site(self.site.clone(), self.log.clone());
        Ok(Session::new(id, Box::new(browser)))
    }

    async fn release(&self, session: Session) {
        let _ = session.browser.close().await;
        self.released.lock().unwrap().push(session.quality);
    }

    fn retired_bad(&self) -> usize {
        self.released
            .lock()
            .unwrap()
            .iter()
            .filter(|q| **q == SessionQuality::Bad)
            .count()
    }
}
