pub mod filter;
pub mod format;

pub use filter::MetricFilter;
pub use format::{OutputFormatter, OutputMode};
