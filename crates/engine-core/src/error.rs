use connectors::error::ConnectorError;
use thiserror::Error;

/// Failure of a single remote page request.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid request URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<FetchError>,
    },

    #[error("Fetcher configuration error: {0}")]
    Config(String),

    #[error("Fetch failed: {0}")]
    Other(String),
}

/// A response body that could not be split into records.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field '{0}' of the response is not an array")]
    NotAnArray(String),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid request template: {0}")]
    Template(String),

    #[error("Failed to render request: {0}")]
    Render(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Failed to encode raw record: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Invalid raw table name: {0}")]
    InvalidTable(String),

    #[error("Sink error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Failed to open state store: {0}")]
    Open(String),

    #[error("Failed to save watermark: {0}")]
    SaveWatermark(String),

    #[error("Failed to load watermark: {0}")]
    LoadWatermark(String),
}
