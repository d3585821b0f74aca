use crate::error::SinkError;
use async_trait::async_trait;
use model::records::raw::RawRecord;

pub mod memory;
pub mod postgres;
pub mod sled_sink;

/// Durable destination of raw records.
///
/// Writes are keyed by fingerprint and replace existing rows, so storing
/// the same record twice leaves one copy. Implementations are shared by
/// all page tasks and must tolerate concurrent `store` calls.
#[async_trait]
pub trait RawSink: Send + Sync {
    /// Runs once before collection. With `purge`, rows previously stored
    /// under the same params digest are removed first.
    async fn prepare(&self, params_digest: &str, purge: bool) -> Result<(), SinkError>;

    /// Persists the records of one page. Returns once they are durable.
    async fn store(&self, records: &[RawRecord]) -> Result<(), SinkError>;
}
