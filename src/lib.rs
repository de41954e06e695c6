pub mod browser;
pub mod challenge;
pub mod config;
pub mod crawlers;
pub mod dedup;
pub mod diagnostics;
pub mod errors;
pub mod extract;
pub mod normalize;
pub mod pagination;
pub mod results;
pub mod sink;
pub mod text;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use config::{HarvestConfig, HarvestInput};
pub use crawlers::CrawlStats;
pub use errors::HarvestError;
pub use results::JobRecord;

use browser::webdriver::WebDriverSessions;
use crawlers::Orchestrator;
use sink::ChannelSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Records are buffered up to this many before workers wait on the consumer
const RECORD_BUFFER: usize = 1000;

/// A started harvest: records arrive on `records` while the run is going,
/// and `finished` resolves to the final statistics.
pub struct HarvestRun {
    pub records: mpsc::Receiver<JobRecord>,
    pub finished: JoinHandle<Result<CrawlStats, HarvestError>>,
}

/// Main builder for a job harvest against a WebDriver-controlled browser
pub struct Harvest {
    config: HarvestConfig,
}

impl Harvest {
    /// Create a new builder with default settings for `start_url`
    pub fn new(start_url: &str) -> Self {
        Self {
            config: HarvestConfig::new(start_url),
        }
    }

    /// Use an already resolved configuration
    pub fn with_config(config: HarvestConfig) -> Self {
        Self { config }
    }

    /// Load configuration from a JSON input file
    pub fn with_config_file(path: impl AsRef<std::path::Path>) -> Result<Self, HarvestError> {
        Ok(Self::with_config(HarvestConfig::from_file(path)?))
    }

    /// Set the number of concurrent browser sessions
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Stop after this many records
    pub fn with_results_wanted(mut self, results_wanted: usize) -> Self {
        self.config.results_wanted = results_wanted;
        self
    }

    /// Visit at most this many listing pages
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Start the harvest and get a receiver for records
    pub async fn generate(self) -> Result<HarvestRun, HarvestError> {
        let mut config = self.config;

        // Override the WebDriver URL with an environment variable if provided
        if let Ok(webdriver_url) = std::env::var("WEBDRIVER_URL") {
            if !webdriver_url.is_empty() {
                config.webdriver_url = webdriver_url;
            }
        }

        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        let sessions = Arc::new(WebDriverSessions::new(&config));
        let orchestrator = Orchestrator::new(config, sessions, Arc::new(ChannelSink::new(tx)))?;
        let finished = tokio::spawn(orchestrator.run());

        Ok(HarvestRun {
            records: rx,
            finished,
        })
    }
}
