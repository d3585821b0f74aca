use crate::{cursor::RowCursor, error::DbError};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Observes a [`MemoryCursor`] from the outside after it has been moved
/// into a batcher.
#[derive(Debug, Clone, Default)]
pub struct CursorProbe {
    fetches: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl CursorProbe {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Cursor over rows already held in memory, e.g. keys passed on the
/// command line or fixtures.
pub struct MemoryCursor<T> {
    rows: VecDeque<T>,
    position: u64,
    fail_at: Option<u64>,
    probe: CursorProbe,
}

impl<T> MemoryCursor<T> {
    pub fn new(rows: impl IntoIterator<Item = T>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            position: 0,
            fail_at: None,
            probe: CursorProbe::default(),
        }
    }

    /// Makes the row at `index` fail to decode.
    pub fn fail_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn probe(&self) -> CursorProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl<T: Send> RowCursor<T> for MemoryCursor<T> {
    async fn fetch(&mut self, n: usize) -> Result<Vec<T>, DbError> {
        if self.probe.is_closed() {
            return Err(DbError::Closed);
        }
        self.probe.fetches.fetch_add(1, Ordering::SeqCst);

        let take = n.min(self.rows.len());
        if let Some(bad) = self.fail_at
            && bad >= self.position
            && bad < self.position + take as u64
        {
            return Err(DbError::Decode {
                row: bad,
                message: "value does not match the declared column type".to_string(),
            });
        }

        self.position += take as u64;
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.rows.clear();
        self.probe.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_rows_in_windows() {
        let mut cursor = MemoryCursor::new(1..=5);
        assert_eq!(cursor.fetch(2).await.unwrap(), vec![1, 2]);
        assert_eq!(cursor.fetch(2).await.unwrap(), vec![3, 4]);
        assert_eq!(cursor.fetch(2).await.unwrap(), vec![5]);
        assert!(cursor.fetch(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_hits_the_window_containing_the_row() {
        let mut cursor = MemoryCursor::new(0..6).fail_at(3);
        assert!(cursor.fetch(2).await.is_ok());
        let err = cursor.fetch(2).await.unwrap_err();
        assert!(matches!(err, DbError::Decode { row: 3, .. }));
    }

    #[tokio::test]
    async fn close_is_visible_through_probe() {
        let mut cursor = MemoryCursor::new(vec!["a"]);
        let probe = cursor.probe();
        cursor.close().await.unwrap();
        assert!(probe.is_closed());
        assert!(matches!(cursor.fetch(1).await, Err(DbError::Closed)));
    }
}
