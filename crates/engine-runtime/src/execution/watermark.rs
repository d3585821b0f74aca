use crate::{error::RunError, execution::factory};
use engine_config::job::JobConfig;
use engine_core::state::{StateStore, Watermark};
use std::sync::Arc;

/// Opens the watermark store configured for `job`.
pub fn open_store(job: &JobConfig) -> Result<Arc<dyn StateStore>, RunError> {
    factory::create_state_store(&job.state)?.ok_or_else(|| {
        RunError::Initialization(format!("Watermark store is disabled for job '{}'", job.name))
    })
}

pub async fn show(store: &dyn StateStore, job: &JobConfig) -> Result<Option<Watermark>, RunError> {
    Ok(store.load_watermark(&job.job_key()).await?)
}

/// Forgets the watermark so the next incremental run starts from the
/// configured `since`. Returns whether one existed.
pub async fn clear(store: &dyn StateStore, job: &JobConfig) -> Result<bool, RunError> {
    Ok(store.clear_watermark(&job.job_key()).await?)
}
