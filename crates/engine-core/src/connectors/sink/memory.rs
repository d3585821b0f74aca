use crate::{connectors::sink::RawSink, error::SinkError};
use async_trait::async_trait;
use model::records::raw::RawRecord;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// Map-backed sink keyed like the durable ones. Cloning shares the rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryRawSink {
    rows: Arc<Mutex<BTreeMap<String, RawRecord>>>,
}

impl MemoryRawSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RawRecord> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RawSink for MemoryRawSink {
    async fn prepare(&self, params_digest: &str, purge: bool) -> Result<(), SinkError> {
        if purge {
            let prefix = format!("{params_digest}:");
            let mut rows = self
                .rows
                .lock()
                .map_err(|e| SinkError::Other(e.to_string()))?;
            rows.retain(|key, _| !key.starts_with(&prefix));
        }
        Ok(())
    }

    async fn store(&self, records: &[RawRecord]) -> Result<(), SinkError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| SinkError::Other(e.to_string()))?;
        for record in records {
            rows.insert(record.key(), record.clone());
        }
        Ok(())
    }
}
