use thiserror::Error;

/// Unified error type for gateway bootstrap and side channels.
///
/// Downstream call failures are not represented here; they travel as
/// [`crate::envelope::DownstreamFailure`] and are always turned into an
/// envelope by the pipeline.
#[derive(Error, Debug)]
pub enum HermesError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid route {path}: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
