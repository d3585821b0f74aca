use crate::error::SourceError;
use connectors::cursor::RowCursor;
use futures::{Stream, stream};
use model::records::batch::{InputBatch, InputKey};
use tracing::{debug, warn};

/// Groups the rows of a forward-only cursor into batches of at most
/// `batch_size` items.
///
/// Each call to [`next_batch`](Self::next_batch) advances the cursor by
/// exactly one batch, so the result set is never held in memory. The
/// cursor is closed as soon as it is exhausted or fails; dropping the
/// batcher early releases it through the cursor's own drop.
pub struct CursorBatcher<T> {
    cursor: Option<Box<dyn RowCursor<T>>>,
    batch_size: usize,
    next_seq: u64,
}

impl<T: InputKey> CursorBatcher<T> {
    pub fn new(cursor: Box<dyn RowCursor<T>>, batch_size: usize) -> Result<Self, SourceError> {
        if batch_size == 0 {
            return Err(SourceError::InvalidBatchSize(batch_size));
        }

        Ok(Self {
            cursor: Some(cursor),
            batch_size,
            next_seq: 0,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }

    /// Pulls the next batch. `Ok(None)` once the cursor is exhausted, and on
    /// every call after that.
    pub async fn next_batch(&mut self) -> Result<Option<InputBatch<T>>, SourceError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let rows = match cursor.fetch(self.batch_size).await {
            Ok(rows) => rows,
            Err(e) => {
                self.release().await;
                return Err(e.into());
            }
        };

        if rows.is_empty() {
            self.close().await?;
            return Ok(None);
        }

        let short = rows.len() < self.batch_size;
        let batch = match InputBatch::new(self.next_seq, rows) {
            Ok(batch) => batch,
            Err(e) => {
                self.release().await;
                return Err(e.into());
            }
        };
        self.next_seq += 1;

        debug!(seq = batch.seq(), size = batch.len(), "Pulled input batch");

        if short {
            self.close().await?;
        }

        Ok(Some(batch))
    }

    /// Closes the cursor. Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), SourceError> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await?;
            debug!(batches = self.next_seq, "Input cursor closed");
        }
        Ok(())
    }

    /// Close on a path that already carries an error.
    async fn release(&mut self) {
        if let Err(e) = self.close().await {
            warn!(error = %e, "Failed to close input cursor");
        }
    }

    /// Consumes the batcher as a stream of batches that ends after the
    /// first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<InputBatch<T>, SourceError>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut batcher = state?;
            match batcher.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), Some(batcher))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
