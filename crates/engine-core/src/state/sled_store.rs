use crate::{
    error::StateStoreError,
    state::{StateStore, Watermark},
};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path).map_err(|e| StateStoreError::Open(e.to_string()))?;
        Ok(Self { db })
    }

    #[inline]
    fn wm_key(job_key: &str) -> String {
        format!("wm:{job_key}")
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn load_watermark(&self, job_key: &str) -> Result<Option<Watermark>, StateStoreError> {
        let bytes = self
            .db
            .get(Self::wm_key(job_key))
            .map_err(|e| StateStoreError::LoadWatermark(e.to_string()))?;

        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StateStoreError::LoadWatermark(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save_watermark(&self, watermark: &Watermark) -> Result<(), StateStoreError> {
        let key = Self::wm_key(&watermark.job_key);
        let new_bytes = bincode::serialize(watermark)
            .map_err(|e| StateStoreError::SaveWatermark(e.to_string()))?;

        // Check-then-set in one transaction so concurrent runs of the same
        // job cannot move the watermark backwards.
        let result = self.db.transaction::<_, _, String>(|tx_db| {
            if let Some(existing_bytes) = tx_db.get(&key)? {
                let existing: Watermark = bincode::deserialize(&existing_bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
                if existing.since > watermark.since {
                    return Ok(());
                }
            }

            tx_db.insert(key.as_bytes(), new_bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(StateStoreError::SaveWatermark(e)),
            Err(TransactionError::Storage(e)) => {
                return Err(StateStoreError::SaveWatermark(e.to_string()));
            }
        }

        self.db
            .flush_async()
            .await
            .map_err(|e| StateStoreError::SaveWatermark(e.to_string()))?;
        Ok(())
    }

    async fn clear_watermark(&self, job_key: &str) -> Result<bool, StateStoreError> {
        let removed = self
            .db
            .remove(Self::wm_key(job_key))
            .map_err(|e| StateStoreError::SaveWatermark(e.to_string()))?;
        Ok(removed.is_some())
    }
}
