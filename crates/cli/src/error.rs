use connectors::error::ConnectorError;
use engine_config::error::ConfigError;
use engine_runtime::error::RunError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to load the job file: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to run the job: {0}")]
    Runner(RunError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Connection check failed: {0}")]
    Connection(#[from] ConnectorError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl From<RunError> for CliError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::ShutdownRequested => CliError::ShutdownRequested,
            other => CliError::Runner(other),
        }
    }
}
