//! Pipeline coordination and the daemon loops
//!
//! All long-running tokio::spawn calls live here.

mod loops;
mod pipeline;

pub use loops::run;
pub use pipeline::{BatchReport, DiscoveryReport, IngestOutcome, JobReport, Pipeline};
