// Market heuristics used by the workers
pub mod trend;

pub use trend::{adjust_timeout, trailing_run, TrendRun};
