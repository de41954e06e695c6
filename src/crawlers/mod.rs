pub mod frontier;
pub mod orchestrator;
pub mod state;


pub use frontier::{Frontier, PageRequest};
pub use orchestrator::Orchestrator;
pub use state::{CrawlStats, RunState};
