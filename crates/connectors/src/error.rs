use thiserror::Error;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Any PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    PgError(#[from] tokio_postgres::Error),

    /// A row could not be decoded into the cursor's scalar type.
    #[error("Failed to decode row {row} of the input query: {message}")]
    Decode { row: u64, message: String },

    /// The input query does not have the expected shape.
    #[error("Invalid input query: {0}")]
    InvalidQuery(String),

    /// The cursor was used after being closed or its driver task stopped.
    #[error("Cursor is closed")]
    Closed,
}

/// Errors happening during connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The connection string could not be parsed.
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    /// PostgreSQL connection failed.
    #[error("PostgreSQL connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    /// TLS connector could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] native_tls::Error),
}
