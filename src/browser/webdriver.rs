use crate::browser::{Browser, Session, SessionProvider, SessionQuality};
use crate::config::HarvestConfig;
use crate::errors::BrowserError;
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// [`Browser`] backed by a WebDriver session
pub struct WebDriverBrowser {
    client: Client,
}

impl WebDriverBrowser {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.client.goto(url)).await {
            Ok(result) => result.map_err(BrowserError::from),
            Err(_) => Err(BrowserError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.client.title().await?)
    }

    async fn source(&self) -> Result<String, BrowserError> {
        Ok(self.client.source().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        Ok(self.client.execute(script, Vec::new()).await?)
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        Ok(self.client.find_all(Locator::Css(selector)).await?.len())
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        match elements.into_iter().next() {
            Some(element) => {
                element.click().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn click_in_frame(
        &self,
        frame_selector: &str,
        targets: &[&str],
    ) -> Result<bool, BrowserError> {
        let frames = self.client.find_all(Locator::Css(frame_selector)).await?;
        let Some(frame) = frames.into_iter().next() else {
            return Ok(false);
        };
        frame.enter_frame().await?;

        let mut clicked = Ok(false);
        for target in targets {
            match self.click(target).await {
                Ok(true) => {
                    clicked = Ok(true);
                    break;
                }
                Ok(false) => continue,
                Err(e) => {
                    clicked = Err(e);
                    break;
                }
            }
        }

        // Always leave the frame, even if the click failed
        self.client.clone().enter_parent_frame().await?;
        clicked
    }

    async fn pointer_move(&self, x: i64, y: i64) -> Result<(), BrowserError> {
        let script = r#"
            const [x, y] = arguments;
            const target = document.elementFromPoint(x, y) || document.body;
            if (target) {
                target.dispatchEvent(new MouseEvent('mousemove', {
                    clientX: x, clientY: y, bubbles: true
                }));
            }
        "#;
        self.client.execute(script, vec![json!(x), json!(y)]).await?;
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), BrowserError> {
        self.client
            .execute(
                "window.scrollBy({ top: arguments[0], behavior: 'smooth' });",
                vec![json!(dy)],
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.client.clone().close().await?;
        Ok(())
    }
}

/// Hands out WebDriver sessions, one fresh browser per acquisition
pub struct WebDriverSessions {
    webdriver_url: String,
    capabilities: serde_json::Map<String, Value>,
    next_id: AtomicUsize,
    retired_bad: AtomicUsize,
}

impl WebDriverSessions {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            capabilities: build_capabilities(config.headless, config.proxy_url.as_deref()),
            next_id: AtomicUsize::new(0),
            retired_bad: AtomicUsize::new(0),
        }
    }

    async fn connect(&self, url: &str) -> Result<Client, BrowserError> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities.clone());
        Ok(builder.connect(url).await?)
    }

    /// Connects to the configured WebDriver, then to common local endpoints
    async fn connect_to_webdriver(&self, worker_id: usize) -> Result<Client, BrowserError> {
        let first_error = match self.connect(&self.webdriver_url).await {
            Ok(client) => {
                ::log::debug!(
                    "Worker {} connected to WebDriver at {}",
                    worker_id,
                    self.webdriver_url
                );
                return Ok(client);
            }
            Err(e) => {
                ::log::error!(
                    "Worker {} failed to connect to WebDriver at {}: {}",
                    worker_id,
                    self.webdriver_url,
                    e
                );
                e
            }
        };

        let fallback_urls = [
            "http://localhost:9515", // ChromeDriver default
            "http://localhost:4444", // Selenium / geckodriver default
            "http://127.0.0.1:4444",
        ];

        for url in fallback_urls.iter() {
            if *url == self.webdriver_url {
                continue;
            }
            ::log::info!("Worker {} trying fallback WebDriver URL: {}", worker_id, url);
            if let Ok(client) = self.connect(url).await {
                ::log::debug!("Worker {} connected to fallback WebDriver at {}", worker_id, url);
                return Ok(client);
            }
        }

        ::log::error!(
            "Make sure a WebDriver server is running or set the WEBDRIVER_URL environment variable"
        );
        Err(first_error)
    }
}

#[async_trait]
impl SessionProvider for WebDriverSessions {
    async fn acquire(&self, worker_id: usize) -> Result<Session, BrowserError> {
        let client = self.connect_to_webdriver(worker_id).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ::log::debug!("Worker {} opened session {}", worker_id, id);
        Ok(Session::new(id, Box::new(WebDriverBrowser::new(client))))
    }

    async fn release(&self, session: Session) {
        if session.quality == SessionQuality::Bad {
            self.retired_bad.fetch_add(1, Ordering::Relaxed);
            ::log::warn!(
                "Retiring session {} after {} pages: marked bad",
                session.id,
                session.usage
            );
        } else {
            ::log::debug!("Releasing session {} after {} pages", session.id, session.usage);
        }
        if let Err(e) = session.browser.close().await {
            ::log::warn!("Failed to close session {}: {}", session.id, e);
        }
    }

    fn retired_bad(&self) -> usize {
        self.retired_bad.load(Ordering::Relaxed)
    }
}

/// WebDriver capabilities that make the browser look less automated
pub fn build_capabilities(headless: bool, proxy_url: Option<&str>) -> serde_json::Map<String, Value> {
    let mut chrome_args = vec![
        "--disable-blink-features=AutomationControlled",
        "--window-size=1920,1080",
        "--lang=en-US",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--no-first-run",
    ];
    let mut firefox_args = Vec::new();
    if headless {
        chrome_args.push("--headless=new");
        firefox_args.push("-headless");
    }

    let mut caps = serde_json::Map::new();
    caps.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": chrome_args,
            "excludeSwitches": ["enable-automation"],
        }),
    );
    caps.insert("moz:firefoxOptions".to_string(), json!({ "args": firefox_args }));

    if let Some(proxy) = proxy_url.and_then(|p| Url::parse(p).ok()) {
        if !proxy.username().is_empty() {
            ::log::warn!("WebDriver proxies cannot carry credentials; using host and port only");
        }
        if let Some(host) = proxy.host_str() {
            let address = match proxy.port_or_known_default() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            caps.insert(
                "proxy".to_string(),
                json!({
                    "proxyType": "manual",
                    "httpProxy": address,
                    "sslProxy": address,
                }),
            );
        }
    }

    caps
}
