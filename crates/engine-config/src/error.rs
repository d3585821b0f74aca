use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a job file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid env file: {0}")]
    EnvFile(String),

    /// A `${NAME}` reference with no matching variable.
    #[error("Environment variable '{0}' is not set")]
    MissingVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
