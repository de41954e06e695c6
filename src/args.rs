use clap::Parser;
use std::path::PathBuf;
use yield_jobs::HarvestInput;
use yield_jobs::errors::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "yield-jobs")]
#[command(about = "Harvests job listings from a search site through a real browser")]
#[command(version)]
pub struct Args {
    /// Listing URL to start from (overrides --keyword)
    pub start_url: Option<String>,

    /// Search keyword used when no start URL is given
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// JSON file with run input; flags given here override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of records to collect
    #[arg(short, long)]
    pub results: Option<usize>,

    /// Maximum number of listing pages to visit
    #[arg(short = 'p', long)]
    pub max_pages: Option<u32>,

    /// Number of concurrent browser sessions
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Proxy URL handed to the browser
    #[arg(long)]
    pub proxy: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Directory for diagnostic snapshots of empty or challenged pages
    #[arg(long)]
    pub diagnostics_dir: Option<PathBuf>,

    /// Write records here as JSON lines instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Args {
    /// Merge the flags over the optional input file
    pub fn to_input(&self) -> Result<HarvestInput, ConfigError> {
        let mut input = match &self.config {
            Some(path) => HarvestInput::from_file(path)?,
            None => HarvestInput::default(),
        };

        if self.start_url.is_some() {
            input.start_url = self.start_url.clone();
        }
        if self.keyword.is_some() {
            input.keyword = self.keyword.clone();
        }
        if let Some(results) = self.results {
            input.results_wanted = Some(results as f64);
        }
        if let Some(max_pages) = self.max_pages {
            input.max_pages = Some(max_pages as f64);
        }
        if let Some(concurrency) = self.concurrency {
            input.max_concurrency = Some(concurrency as f64);
        }
        if self.proxy.is_some() {
            input.proxy_url = self.proxy.clone();
        }
        if self.headful {
            input.headless = Some(false);
        }
        if self.diagnostics_dir.is_some() {
            input.diagnostics_dir = self.diagnostics_dir.clone();
        }

        Ok(input)
    }
}
