use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use yield_jobs::{Harvest, JobRecord};

mod args;
use args::Args;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    // Parse command-line arguments
    let args = Args::parse();

    let config = match args.to_input().and_then(|input| input.resolve()) {
        Ok(config) => config,
        Err(e) => {
            ::log::error!("Invalid input: {}", e);
            std::process::exit(2);
        }
    };

    ::log::info!("Starting harvest for: {}", config.start_url);
    println!("Note: Harvesting requires a WebDriver server (e.g., ChromeDriver).");
    println!(
        "Set WEBDRIVER_URL environment variable if not using the default http://localhost:4444"
    );

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(e) => {
                ::log::error!("Cannot create {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let mut run = match Harvest::with_config(config).generate().await {
        Ok(run) => run,
        Err(e) => {
            ::log::error!("Failed to start harvest: {}", e);
            std::process::exit(1);
        }
    };

    // Write records as they come in
    let mut written = 0;
    while let Some(record) = run.records.recv().await {
        written += 1;
        if let Err(e) = write_record(&mut out, &record) {
            ::log::error!("Failed to write record {}: {}", written, e);
        }
    }
    if let Err(e) = out.flush() {
        ::log::error!("Failed to flush output: {}", e);
    }

    match run.finished.await {
        Ok(Ok(stats)) => {
            ::log::info!(
                "Harvest finished: {} records, {} pages, method {:?}, {} empty, {} challenges failed, {} requests dropped",
                stats.total_saved,
                stats.pages_processed,
                stats.extraction_method,
                stats.empty_pages,
                stats.challenges_failed,
                stats.requests_dropped
            );
            if let Ok(json) = serde_json::to_string(&stats) {
                ::log::debug!("Run statistics: {}", json);
            }
        }
        Ok(Err(e)) => {
            ::log::error!("Harvest failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            ::log::error!("Harvest task panicked: {}", e);
            std::process::exit(1);
        }
    }
}

fn write_record(out: &mut dyn Write, record: &JobRecord) -> io::Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")
}
