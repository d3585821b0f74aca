use connectors::error::{ConnectorError, DbError};
use engine_config::error::ConfigError;
use engine_core::error::{FetchError, QueryError, SinkError, StateStoreError};
use engine_processing::error::CollectorError;
use thiserror::Error;

/// Top-level errors of a collection run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    /// The input query could not be opened.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid request template: {0}")]
    Query(#[from] QueryError),

    #[error("Failed to set up the page fetcher: {0}")]
    Fetcher(#[from] FetchError),

    #[error("Failed to open raw sink: {0}")]
    Sink(#[from] SinkError),

    #[error("Watermark store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Collection failed: {0}")]
    Collector(CollectorError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl From<CollectorError> for RunError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Cancelled => RunError::ShutdownRequested,
            other => RunError::Collector(other),
        }
    }
}
