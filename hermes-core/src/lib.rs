pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod log_entry;
pub mod uri;

pub use config::HermesConfig;
pub use envelope::{DownstreamFailure, FailureKind, PayloadKind, ResponseEnvelope};
pub use error::HermesError;
pub use identity::IdentityResolver;
pub use log_entry::LogEntry;
