pub mod file_sink;
pub mod sink;

#[cfg(feature = "prometheus")]
pub mod metrics;

pub use file_sink::FileSink;
pub use sink::{LogSink, TracingSink};

#[cfg(feature = "prometheus")]
pub use metrics::ProxyMetrics;
