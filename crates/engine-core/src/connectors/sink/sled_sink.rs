use crate::{connectors::sink::RawSink, error::SinkError};
use async_trait::async_trait;
use model::records::raw::RawRecord;
use std::path::Path;
use tracing::{debug, info};

/// Raw table as a sled tree. Keys are `<params digest>:<fingerprint>` and
/// values the bincode-encoded record, so an insert is an upsert.
#[derive(Clone)]
pub struct SledRawSink {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledRawSink {
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, SinkError> {
        let db = sled::open(path)?;
        Self::with_db(db, table)
    }

    pub fn with_db(db: sled::Db, table: &str) -> Result<Self, SinkError> {
        if table.trim().is_empty() {
            return Err(SinkError::InvalidTable(table.to_string()));
        }
        let tree = db.open_tree(table)?;
        Ok(Self { db, tree })
    }

    pub fn records(&self) -> Result<Vec<RawRecord>, SinkError> {
        self.tree
            .iter()
            .values()
            .map(|value| Ok(bincode::deserialize(&value?)?))
            .collect()
    }

    pub fn get(&self, key: &str) -> Result<Option<RawRecord>, SinkError> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[async_trait]
impl RawSink for SledRawSink {
    async fn prepare(&self, params_digest: &str, purge: bool) -> Result<(), SinkError> {
        if !purge {
            return Ok(());
        }

        let prefix = format!("{params_digest}:");
        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for key in self.tree.scan_prefix(prefix.as_bytes()).keys() {
            batch.remove(key?);
            removed += 1;
        }
        self.tree.apply_batch(batch)?;
        self.db.flush_async().await?;

        info!(params = %params_digest, removed, "Purged previous raw rows");
        Ok(())
    }

    async fn store(&self, records: &[RawRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for record in records {
            batch.insert(record.key().as_bytes(), bincode::serialize(record)?);
        }
        self.tree.apply_batch(batch)?;
        self.db.flush_async().await?;

        debug!(count = records.len(), "Stored raw records");
        Ok(())
    }
}
