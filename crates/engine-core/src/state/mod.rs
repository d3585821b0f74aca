use crate::error::StateStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod sled_store;

/// Lower time bound for the next incremental run of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub job_key: String,
    /// Start time of the run that produced this watermark.
    pub since: DateTime<Utc>,
    /// Records stored by that run.
    pub records: u64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_watermark(&self, job_key: &str) -> Result<Option<Watermark>, StateStoreError>;

    /// Saves `watermark` unless a later one is already stored.
    async fn save_watermark(&self, watermark: &Watermark) -> Result<(), StateStoreError>;

    /// Returns whether a watermark was removed.
    async fn clear_watermark(&self, job_key: &str) -> Result<bool, StateStoreError>;
}
