use connectors::error::DbError;
use engine_core::error::{FetchError, ParseError, QueryError, SinkError};
use thiserror::Error;

/// Failure of the input side: the database query or a row decode.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Input query failed: {0}")]
    Db(#[from] DbError),

    #[error("Failed to encode input batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid batch size {0}")]
    InvalidBatchSize(usize),
}

/// Why a collection run stopped without completing.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to build request for batch #{batch} page {page}: {source}")]
    Query {
        batch: u64,
        page: u64,
        #[source]
        source: QueryError,
    },

    #[error("Fetch failed for batch #{batch} page {page}: {source}")]
    Fetch {
        batch: u64,
        page: u64,
        #[source]
        source: FetchError,
    },

    #[error("Cannot parse response of batch #{batch} page {page}: {source}")]
    Parse {
        batch: u64,
        page: u64,
        #[source]
        source: ParseError,
    },

    #[error("Failed to persist records of batch #{batch} page {page}: {source}")]
    Persistence {
        batch: u64,
        page: u64,
        #[source]
        source: SinkError,
    },

    #[error("Failed to prepare raw sink: {0}")]
    Prepare(#[source] SinkError),

    #[error("Invalid collector configuration: {0}")]
    Config(String),

    #[error("Collection cancelled")]
    Cancelled,

    #[error("Page task failed to complete: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
