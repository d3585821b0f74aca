use crate::error::DbError;
use async_trait::async_trait;

/// Forward-only cursor over a single-column result set whose rows decode
/// into `T`.
#[async_trait]
pub trait RowCursor<T>: Send {
    /// Advances the cursor by at most `n` rows. Returning fewer than `n`
    /// rows means the cursor is exhausted.
    async fn fetch(&mut self, n: usize) -> Result<Vec<T>, DbError>;

    /// Releases the underlying resources. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), DbError>;
}
