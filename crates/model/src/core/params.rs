use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value pairs identifying one logical collection job, e.g.
/// `{ "connection_id": 1, "board_id": 8 }`.
///
/// Keys are kept ordered so the canonical JSON form, and therefore the
/// digest, does not depend on insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CollectorParams(BTreeMap<String, Value>);

impl CollectorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Canonical JSON rendering, stored next to every raw record.
    pub fn canonical_json(&self) -> String {
        // A BTreeMap of untagged scalars always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Stable digest of the params; two runs with equal digests target the
    /// same raw rows.
    pub fn digest(&self) -> String {
        let mut h = blake3::Hasher::new();
        h.update(self.canonical_json().as_bytes());
        h.finalize().to_hex()[..16].to_string()
    }
}

impl FromIterator<(String, Value)> for CollectorParams {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
