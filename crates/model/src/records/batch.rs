use serde::Serialize;
use std::fmt::Display;

/// Element type that can flow from the database cursor into a remote
/// request: rendered with `Display` by query builders and serialized into
/// the raw rows for traceability.
pub trait InputKey: Display + Serialize + Clone + Send + Sync + 'static {}

impl<T> InputKey for T where T: Display + Serialize + Clone + Send + Sync + 'static {}

/// A bounded group of input keys paginated together.
///
/// Immutable once built; the collector shares it between the sequential
/// page tasks of the batch.
#[derive(Debug, Clone)]
pub struct InputBatch<T> {
    seq: u64,
    items: Vec<T>,
    input: String,
    digest: String,
}

impl<T: InputKey> InputBatch<T> {
    pub fn new(seq: u64, items: Vec<T>) -> Result<Self, serde_json::Error> {
        let input = serde_json::to_string(&items)?;
        let mut h = blake3::Hasher::new();
        h.update(input.as_bytes());
        let digest = h.finalize().to_hex()[..16].to_string();

        Ok(Self {
            seq,
            items,
            input,
            digest,
        })
    }

    /// Position of the batch in the cursor sequence, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// JSON array of the batch items.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Items joined with `sep` using their `Display` form.
    pub fn join(&self, sep: &str) -> String {
        self.items
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
