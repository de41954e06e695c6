use thiserror::Error;

/// Top-level error for a harvest run.
///
/// Only [`HarvestError::Config`] and [`HarvestError::NoSession`] ever abort a
/// run; everything else is handled locally by the orchestrator and shows up in
/// the run statistics instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Navigation to {url} failed: {source}")]
    Navigation { url: String, source: BrowserError },

    #[error("Access blocked at {url}")]
    Blocked { url: String },

    #[error("Challenge unresolved at {url} after {cycles} cycles")]
    ChallengeUnresolved { url: String, cycles: u32 },

    #[error("Page handling timed out for {url}")]
    PageTimeout { url: String },

    #[error("No browser session could be obtained: {0}")]
    NoSession(BrowserError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Whether the failed request may be retried with a fresh attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HarvestError::Navigation { .. }
                | HarvestError::Blocked { .. }
                | HarvestError::PageTimeout { .. }
                | HarvestError::Browser(_)
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors reported by a browser driver.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to connect to WebDriver: {0}")]
    Connect(String),

    #[error("WebDriver command failed: {0}")]
    Command(String),

    #[error("Browser session lost")]
    SessionLost,

    #[error("Navigation timed out after {0} ms")]
    Timeout(u64),
}

impl From<fantoccini::error::CmdError> for BrowserError {
    fn from(error: fantoccini::error::CmdError) -> Self {
        let message = error.to_string();
        if message.contains("Unable to find session") || message.contains("invalid session id") {
            BrowserError::SessionLost
        } else {
            BrowserError::Command(message)
        }
    }
}

impl From<fantoccini::error::NewSessionError> for BrowserError {
    fn from(error: fantoccini::error::NewSessionError) -> Self {
        BrowserError::Connect(error.to_string())
    }
}

/// Errors raised by a record sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Record receiver closed")]
    Closed,

    #[error("Failed to write record: {0}")]
    Write(String),
}
