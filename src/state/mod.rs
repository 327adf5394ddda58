//! Runtime state shared by the pipeline and the daemon loops

mod model;

pub use model::{build_metrics, CounterSnapshot, Counters, RuntimeState};
