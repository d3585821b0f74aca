#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use connectors::{cursor::RowCursor, memory::MemoryCursor};
use engine_core::{
    connectors::{
        fetcher::{PageFetcher, PageRequest, PageResponse},
        sink::{RawSink, memory::MemoryRawSink},
        splitter::JsonFieldSplitter,
        total_pages::TotalPagesResolver,
    },
    error::{FetchError, QueryError, SinkError},
};
use engine_processing::collector::{Collector, CollectorConfig};
use model::{
    core::params::CollectorParams,
    pagination::pager::Pager,
    records::{batch::InputBatch, raw::RawRecord},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Field holding the records in every scripted body.
pub const RECORDS_FIELD: &str = "items";

/// Query used by collector-level tests: `?keys=A,B&page=0`.
pub fn keyed_query(batch: &InputBatch<String>, pager: &Pager) -> Result<PageRequest, QueryError> {
    Ok(PageRequest::new("search")
        .param("keys", batch.join(","))
        .param("page", pager.page))
}

/// Body with `count` records and optional pagination metadata.
///
/// Records carry their request coordinates so that payloads differ
/// between pages.
pub fn body(keys: &str, page: u64, count: usize, pages: Option<u64>) -> String {
    let items = (0..count)
        .map(|i| format!(r#"{{"keys":"{keys}","page":{page},"i":{i}}}"#))
        .collect::<Vec<_>>()
        .join(",");
    match pages {
        Some(pages) => format!(r#"{{"pages":{pages},"{RECORDS_FIELD}":[{items}]}}"#),
        None => format!(r#"{{"{RECORDS_FIELD}":[{items}]}}"#),
    }
}

pub fn empty_body() -> String {
    format!(r#"{{"{RECORDS_FIELD}":[]}}"#)
}

/// Fetcher answering from a script keyed by (filter, page) query values.
///
/// Unscripted requests get an empty page. Every call is recorded, and
/// the number of concurrent calls is tracked.
pub struct ScriptedFetcher {
    key_param: String,
    page_param: String,
    script: HashMap<(String, u64), String>,
    failures: HashMap<(String, u64), u16>,
    delay: Duration,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, u64)>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::with_params("keys", "page")
    }

    /// Reads the script key from `key_param` and the page from `page_param`.
    pub fn with_params(key_param: &str, page_param: &str) -> Self {
        Self {
            key_param: key_param.to_string(),
            page_param: page_param.to_string(),
            script: HashMap::new(),
            failures: HashMap::new(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn page(mut self, keys: &str, page: u64, body: impl Into<String>) -> Self {
        self.script.insert((keys.to_string(), page), body.into());
        self
    }

    /// Answers (keys, page) with an HTTP error status.
    pub fn fail(mut self, keys: &str, page: u64, status: u16) -> Self {
        self.failures.insert((keys.to_string(), page), status);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the delay for every page of `keys`.
    pub fn delay_for(mut self, keys: &str, delay: Duration) -> Self {
        self.delays.insert(keys.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, keys: &str) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter(|(k, _)| k == keys)
            .map(|(_, page)| page)
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, FetchError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let keys = request.get(&self.key_param).unwrap_or_default().to_string();
        let page = request
            .get(&self.page_param)
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        self.calls.lock().unwrap().push((keys.clone(), page));

        let delay = self.delays.get(&keys).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let key = (keys, page);
        if let Some(status) = self.failures.get(&key) {
            return Err(FetchError::Status {
                url: request.to_string(),
                status: *status,
                body: "scripted failure".to_string(),
            });
        }

        let body = self.script.get(&key).cloned().unwrap_or_else(empty_body);
        Ok(PageResponse {
            url: request.to_string(),
            body: Bytes::from(body),
        })
    }
}

/// Sink that accepts `ok_stores` writes and fails every later one.
pub struct FailingSink {
    inner: MemoryRawSink,
    ok_stores: usize,
    stores: AtomicUsize,
}

impl FailingSink {
    pub fn new(ok_stores: usize) -> Self {
        Self {
            inner: MemoryRawSink::new(),
            ok_stores,
            stores: AtomicUsize::new(0),
        }
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl RawSink for FailingSink {
    async fn prepare(&self, params_digest: &str, purge: bool) -> Result<(), SinkError> {
        self.inner.prepare(params_digest, purge).await
    }

    async fn store(&self, records: &[RawRecord]) -> Result<(), SinkError> {
        if self.stores.fetch_add(1, Ordering::SeqCst) >= self.ok_stores {
            return Err(SinkError::Other("disk full".to_string()));
        }
        self.inner.store(records).await
    }
}

pub fn cursor(keys: &[&str]) -> MemoryCursor<String> {
    MemoryCursor::new(keys.iter().map(|k| k.to_string()))
}

pub fn boxed(cursor: MemoryCursor<String>) -> Box<dyn RowCursor<String>> {
    Box::new(cursor)
}

pub fn params() -> CollectorParams {
    CollectorParams::new()
        .with("connection_id", 1i64)
        .with("board_id", 8i64)
}

/// Collector over [`keyed_query`] and the `items` splitter.
pub fn collector(
    config: CollectorConfig,
    fetcher: Arc<ScriptedFetcher>,
    resolver: Arc<dyn TotalPagesResolver>,
    sink: Arc<dyn RawSink>,
) -> Collector<String> {
    Collector::new(
        config,
        params(),
        Arc::new(keyed_query),
        fetcher,
        Arc::new(JsonFieldSplitter::new(RECORDS_FIELD)),
        resolver,
        sink,
    )
    .expect("valid collector")
}

/// Stored records without the collection timestamp, ordered by key.
pub fn stable_view(records: Vec<RawRecord>) -> Vec<(String, String, Vec<u8>)> {
    let mut view: Vec<_> = records
        .into_iter()
        .map(|r| (r.key(), r.url, r.payload))
        .collect();
    view.sort();
    view
}
