use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One opaque record as returned by the remote API, with enough context to
/// trace it back to the request that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub fingerprint: String,
    pub params_digest: String,
    /// Canonical JSON of the collector params.
    pub params: String,
    pub batch_digest: String,
    pub page_index: u64,
    pub record_index: u64,
    /// JSON array of the input batch the request was built from.
    pub input: String,
    pub url: String,
    pub payload: Vec<u8>,
    pub collected_at: DateTime<Utc>,
}

impl RawRecord {
    /// Storage key: params digest first so all rows of a job share a prefix.
    pub fn key(&self) -> String {
        format!("{}:{}", self.params_digest, self.fingerprint)
    }
}

/// Digest of one collection window: the params digest, narrowed by the
/// since bound when there is one.
///
/// Runs over different windows return different result sets, so records
/// at the same (batch, page, index) position are unrelated and must not
/// share a fingerprint. Unbounded runs keep the bare params digest.
pub fn scope_digest(params_digest: &str, since: Option<&DateTime<Utc>>) -> String {
    match since {
        Some(since) => {
            let mut h = blake3::Hasher::new();
            h.update(params_digest.as_bytes());
            h.update(b":since:");
            h.update(since.to_rfc3339().as_bytes());
            h.finalize().to_hex()[..16].to_string()
        }
        None => params_digest.to_string(),
    }
}

/// Deterministic identity of a raw record across re-runs of the same
/// window. `scope` comes from [`scope_digest`].
pub fn fingerprint(
    scope: &str,
    batch_digest: &str,
    page_index: u64,
    record_index: u64,
) -> String {
    let mut h = blake3::Hasher::new();
    h.update(scope.as_bytes());
    h.update(b":");
    h.update(batch_digest.as_bytes());
    h.update(b":");
    h.update(&page_index.to_le_bytes());
    h.update(&record_index.to_le_bytes());
    h.finalize().to_hex().to_string()
}
