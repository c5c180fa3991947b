pub mod app;
pub mod sink;

pub use app::{GatewayDeps, build_router};
