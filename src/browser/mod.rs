pub mod webdriver;

use crate::errors::BrowserError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Operations the harvester needs from a live browser page.
///
/// Every call is a suspension point; a session only ever serves one page at a
/// time, so implementations need not support concurrent calls.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Navigate to `url`, failing if the load takes longer than `timeout`
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    /// Current serialized DOM
    async fn source(&self) -> Result<String, BrowserError>;

    /// Run a script in the page and return its result
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    /// Number of elements matching a CSS selector
    async fn count(&self, selector: &str) -> Result<usize, BrowserError>;

    /// Click the first element matching `selector`; false if there was none
    async fn click(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Enter the first frame matching `frame_selector`, click the first of
    /// `targets` found inside it, and return to the top document
    async fn click_in_frame(
        &self,
        frame_selector: &str,
        targets: &[&str],
    ) -> Result<bool, BrowserError>;

    async fn pointer_move(&self, x: i64, y: i64) -> Result<(), BrowserError>;

    async fn scroll_by(&self, dy: i64) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;

    /// Inner viewport size, if the page reports one
    async fn viewport(&self) -> Result<(i64, i64), BrowserError> {
        let value = self
            .evaluate("return [window.innerWidth, window.innerHeight];")
            .await?;
        let width = value.get(0).and_then(Value::as_i64).unwrap_or(1920);
        let height = value.get(1).and_then(Value::as_i64).unwrap_or(1080);
        Ok((width, height))
    }

    /// Suspend the calling flow for `duration`
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Poll until the document reports it finished loading, up to `timeout`
    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), BrowserError> {
        let step = Duration::from_millis(250);
        let mut waited = Duration::ZERO;
        while waited < timeout {
            let state = self.evaluate("return document.readyState;").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            self.wait(step).await;
            waited += step;
        }
        ::log::debug!("Document did not settle within {:?}", timeout);
        Ok(())
    }
}

/// Feedback on how a session fared, used to retire blocked identities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionQuality {
    #[default]
    Unknown,
    Good,
    Bad,
}

/// One browser identity handed out by a [`SessionProvider`]
pub struct Session {
    pub id: usize,
    pub browser: Box<dyn Browser>,
    pub quality: SessionQuality,
    pub usage: u32,
}

impl Session {
    pub fn new(id: usize, browser: Box<dyn Browser>) -> Self {
        Self {
            id,
            browser,
            quality: SessionQuality::Unknown,
            usage: 0,
        }
    }

    pub fn mark_good(&mut self) {
        if self.quality != SessionQuality::Bad {
            self.quality = SessionQuality::Good;
        }
    }

    pub fn mark_bad(&mut self) {
        self.quality = SessionQuality::Bad;
    }

    /// Whether the session should be handed back instead of reused
    pub fn is_spent(&self, max_usage: u32) -> bool {
        self.quality == SessionQuality::Bad || self.usage >= max_usage
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("quality", &self.quality)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Source of browser sessions (and the proxies behind them)
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self, worker_id: usize) -> Result<Session, BrowserError>;

    /// Return a session; its quality tells the provider whether to trust the
    /// identity again
    async fn release(&self, session: Session);

    /// Sessions released so far with [`SessionQuality::Bad`]
    fn retired_bad(&self) -> usize;
}
