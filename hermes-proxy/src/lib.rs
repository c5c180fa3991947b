pub mod downstream;
pub mod pipeline;

pub use downstream::{DownstreamCaller, DownstreamRequest, HttpDownstream};
pub use pipeline::{Outcome, ProxyPipeline, RequestContext, VersionCheck};
