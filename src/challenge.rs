use crate::browser::Browser;
use crate::config::ChallengeConfig;
use crate::errors::BrowserError;
use crate::text::visible_text;
use crate::utils::{jitter, random_below};
use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;

/// Title fragments shown by interstitial challenge pages (lowercase)
const TITLE_SIGNATURES: &[&str] = &[
    "just a moment",
    "attention required",
    "verify you are human",
    "security check",
    "please wait",
];

/// Body fragments shown by interstitial challenge pages (lowercase)
const BODY_SIGNATURES: &[&str] = &[
    "checking your browser",
    "verify you are human",
    "verifying you are human",
    "needs to review the security of your connection",
    "enable javascript and cookies to continue",
    "complete the security check",
];

/// Elements only present while a challenge is running
const MARKER_SELECTORS: &[&str] = &[
    "#challenge-running",
    "#challenge-form",
    "#challenge-stage",
    "#cf-challenge-running",
    "#turnstile-wrapper",
    ".cf-browser-verification",
    r#"iframe[src*="challenges.cloudflare.com"]"#,
];

/// Frames that host a checkbox-style challenge widget
const CHALLENGE_FRAMES: &[&str] = &[
    r#"iframe[src*="challenges.cloudflare.com"]"#,
    r#"iframe[src*="turnstile"]"#,
    r#"iframe[title*="challenge"]"#,
    r#"iframe[src*="captcha"]"#,
];

/// Checkbox-like controls inside a challenge frame
const FRAME_TARGETS: &[&str] = &[
    r#"input[type="checkbox"]"#,
    ".cb-lb input",
    r#"[role="checkbox"]"#,
    "label",
];

/// Verification controls placed directly on the interstitial
const VERIFY_CONTROLS: &[&str] = &[
    r#"#challenge-stage input[type="button"]"#,
    r#"#challenge-stage input[type="submit"]"#,
    r#"input[value*="Verify"]"#,
    r#"button[type="submit"][value*="Verify"]"#,
];

/// Title fragments of a hard block (case sensitive, as served)
const BLOCK_TITLES: &[&str] = &["Access Denied", "Blocked"];

/// Body fragments of a hard block
const BLOCK_BODIES: &[&str] = &["Access Denied", "Error 403"];

/// State of one page visit with respect to an anti-bot interstitial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChallengeState {
    Clean,
    Challenged,
    Bypassed,
    Failed,
}

impl ChallengeState {
    /// Next state after observing the page. `cycles` counts completed
    /// wait/re-check cycles; `ceiling` is the most that are allowed.
    pub fn advance(self, challenged: bool, cycles: u32, ceiling: u32) -> ChallengeState {
        match self {
            ChallengeState::Clean if challenged => ChallengeState::Challenged,
            ChallengeState::Challenged if !challenged => ChallengeState::Bypassed,
            ChallengeState::Challenged if cycles >= ceiling => ChallengeState::Failed,
            state => state,
        }
    }

    /// Whether extraction may run on the page
    pub fn is_cleared(self) -> bool {
        matches!(self, ChallengeState::Clean | ChallengeState::Bypassed)
    }
}

/// Which signatures matched on a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChallengeSignals {
    pub title_match: bool,
    pub body_match: bool,
    pub marker_present: bool,
    pub blocked: bool,
}

impl ChallengeSignals {
    /// Evaluate signatures against a page title and its markup
    pub fn detect(title: &str, html: &str) -> Self {
        let doc = Html::parse_document(html);
        let body = visible_text(&doc).to_lowercase();
        let title_lower = title.to_lowercase();

        let marker_present = MARKER_SELECTORS.iter().any(|sel| {
            Selector::parse(sel)
                .map(|s| doc.select(&s).next().is_some())
                .unwrap_or(false)
        });

        let blocked = BLOCK_TITLES.iter().any(|sig| title.contains(sig))
            || BLOCK_BODIES
                .iter()
                .any(|sig| body.contains(&sig.to_lowercase()));

        Self {
            title_match: TITLE_SIGNATURES.iter().any(|sig| title_lower.contains(sig)),
            body_match: BODY_SIGNATURES.iter().any(|sig| body.contains(sig)),
            marker_present,
            blocked,
        }
    }

    pub fn is_challenge(&self) -> bool {
        self.title_match || self.body_match || self.marker_present
    }
}

/// Result of running the resolver on one page
#[derive(Debug, Clone, Copy)]
pub struct ChallengeOutcome {
    pub state: ChallengeState,
    /// Wait/re-check cycles spent
    pub cycles: u32,
    /// Signatures observed on the final check
    pub signals: ChallengeSignals,
}

/// Detects and tries to clear anti-bot interstitials
#[derive(Debug, Clone)]
pub struct ChallengeResolver {
    config: ChallengeConfig,
}

impl ChallengeResolver {
    pub fn new(config: ChallengeConfig) -> Self {
        Self { config }
    }

    /// Runs the challenge loop on the currently loaded page.
    ///
    /// Returns `Clean` without waiting when no signature matches. Otherwise
    /// waits, nudges and re-checks until the signatures clear (`Bypassed`) or
    /// `max_cycles` re-checks have failed (`Failed`). Browser errors while
    /// inspecting the page propagate; errors during bypass attempts do not.
    pub async fn resolve(&self, browser: &dyn Browser) -> Result<ChallengeOutcome, BrowserError> {
        let ceiling = self.config.max_cycles;
        let mut signals = inspect(browser).await?;
        let mut state = ChallengeState::Clean.advance(signals.is_challenge(), 0, ceiling);
        let mut cycles = 0;

        if state == ChallengeState::Challenged {
            ::log::info!("Challenge detected ({:?}), waiting for resolution", signals);
        }

        while state == ChallengeState::Challenged {
            cycles += 1;
            self.run_cycle(browser, cycles).await;
            signals = inspect(browser).await?;
            state = state.advance(signals.is_challenge(), cycles, ceiling);
        }

        match state {
            ChallengeState::Bypassed => {
                ::log::info!("Challenge passed after {} cycle(s)", cycles)
            }
            ChallengeState::Failed => {
                ::log::warn!("Challenge still present after {} cycle(s), giving up", cycles)
            }
            _ => {}
        }

        Ok(ChallengeOutcome {
            state,
            cycles,
            signals,
        })
    }

    async fn run_cycle(&self, browser: &dyn Browser, cycle: u32) {
        ::log::debug!("Challenge cycle {}/{}", cycle, self.config.max_cycles);
        browser
            .wait(jitter(self.config.min_delay_ms, self.config.max_delay_ms))
            .await;

        if self.config.humanize {
            if let Err(e) = humanize(browser).await {
                ::log::debug!("Human-like movement failed: {}", e);
            }
        }

        if self.config.interactive {
            match attempt_bypass(browser).await {
                Ok(true) => ::log::debug!("Clicked a verification control"),
                Ok(false) => {}
                Err(e) => ::log::debug!("Bypass attempt failed: {}", e),
            }
        }

        if let Err(e) = browser
            .wait_for_idle(Duration::from_millis(self.config.idle_timeout_ms))
            .await
        {
            ::log::debug!("Waiting for idle failed: {}", e);
        }
    }
}

/// Reads title and markup and evaluates the signature set
pub async fn inspect(browser: &dyn Browser) -> Result<ChallengeSignals, BrowserError> {
    let title = browser.title().await?;
    let html = browser.source().await?;
    Ok(ChallengeSignals::detect(&title, &html))
}

/// A few random pointer movements and a scroll
pub async fn humanize(browser: &dyn Browser) -> Result<(), BrowserError> {
    let (width, height) = browser.viewport().await?;
    for _ in 0..3 {
        let x = random_below(width.max(1) as u64) as i64;
        let y = random_below(height.max(1) as u64) as i64;
        browser.pointer_move(x, y).await?;
        browser.wait(jitter(200, 500)).await;
    }
    browser.scroll_by(200 + random_below(500) as i64).await?;
    browser.wait(jitter(500, 1500)).await;
    Ok(())
}

/// Best-effort click on a checkbox challenge or verification control
async fn attempt_bypass(browser: &dyn Browser) -> Result<bool, BrowserError> {
    for frame in CHALLENGE_FRAMES {
        if browser.click_in_frame(frame, FRAME_TARGETS).await? {
            return Ok(true);
        }
    }
    for control in VERIFY_CONTROLS {
        if browser.click(control).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrowser;

    const CHALLENGE_PAGE: &str = r#"<html><head><title>Just a moment...</title></head>
        <body><div id="challenge-running"></div><p>Checking your browser before accessing.</p></body></html>"#;

    const LISTING_PAGE: &str =
        r#"<html><head><title>Jobs</title></head><body><article>Job</article></body></html>"#;

    fn fast_config(max_cycles: u32) -> ChallengeConfig {
        ChallengeConfig {
            max_cycles,
            min_delay_ms: 0,
            max_delay_ms: 0,
            idle_timeout_ms: 0,
            humanize: true,
            interactive: true,
        }
    }

    #[test]
    fn test_detect_signatures() {
        let signals = ChallengeSignals::detect("Just a moment...", CHALLENGE_PAGE);
        assert!(signals.title_match);
        assert!(signals.body_match);
        assert!(signals.marker_present);
        assert!(!signals.blocked);

        let clean = ChallengeSignals::detect("Jobs", LISTING_PAGE);
        assert!(!clean.is_challenge());
    }

    #[test]
    fn test_detect_block() {
        let signals = ChallengeSignals::detect(
            "Access Denied",
            "<html><body>You don't have permission</body></html>",
        );
        assert!(signals.blocked);
        assert!(!signals.is_challenge());
    }

    #[test]
    fn test_state_transitions() {
        use ChallengeState::*;
        assert_eq!(Clean.advance(false, 0, 3), Clean);
        assert_eq!(Clean.advance(true, 0, 3), Challenged);
        assert_eq!(Challenged.advance(true, 2, 3), Challenged);
        assert_eq!(Challenged.advance(true, 3, 3), Failed);
        assert_eq!(Challenged.advance(false, 3, 3), Bypassed);
        assert_eq!(Failed.advance(false, 4, 3), Failed);
        assert!(Bypassed.is_cleared());
        assert!(!Failed.is_cleared());
    }

    #[tokio::test]
    async fn test_clean_page_needs_no_cycles() {
        let browser = MockBrowser::with_page("Jobs", LISTING_PAGE);
        let resolver = ChallengeResolver::new(fast_config(5));
        let outcome = resolver.resolve(&browser).await.unwrap();
        assert_eq!(outcome.state, ChallengeState::Clean);
        assert_eq!(outcome.cycles, 0);
        assert_eq!(browser.title_calls(), 1);
    }

    #[tokio::test]
    async fn test_fails_after_exactly_ceiling() {
        let browser = MockBrowser::with_page("Just a moment...", CHALLENGE_PAGE);
        let resolver = ChallengeResolver::new(fast_config(5));
        let outcome = resolver.resolve(&browser).await.unwrap();
        assert_eq!(outcome.state, ChallengeState::Failed);
        assert_eq!(outcome.cycles, 5);
        // One initial check plus one re-check per cycle
        assert_eq!(browser.title_calls(), 6);
    }

    #[tokio::test]
    async fn test_bypassed_when_signature_clears() {
        let browser = MockBrowser::with_page("Just a moment...", CHALLENGE_PAGE);
        browser.clear_challenge_after(2, "Jobs", LISTING_PAGE);
        let resolver = ChallengeResolver::new(fast_config(8));
        let outcome = resolver.resolve(&browser).await.unwrap();
        assert_eq!(outcome.state, ChallengeState::Bypassed);
        assert_eq!(outcome.cycles, 2);
    }

    #[tokio::test]
    async fn test_bypass_clicks_challenge_frame() {
        let browser = MockBrowser::with_page("Just a moment...", CHALLENGE_PAGE);
        browser.add_frame(r#"iframe[src*="challenges.cloudflare.com"]"#);
        let resolver = ChallengeResolver::new(fast_config(1));
        resolver.resolve(&browser).await.unwrap();
        assert_eq!(browser.frame_clicks(), 1);
    }
}
