use crate::error::CollectorError;
use chrono::Utc;
use engine_core::{
    connectors::{
        fetcher::PageFetcher, query::QueryBuilder, sink::RawSink, splitter::ResponseSplitter,
        total_pages::TotalPagesResolver,
    },
    metrics::Metrics,
};
use model::{
    pagination::pager::{Pager, TotalPages},
    records::{
        batch::{InputBatch, InputKey},
        raw::{RawRecord, fingerprint},
    },
};
use std::sync::Arc;
use tracing::debug;

/// Collaborators shared by every page task of a run.
pub(crate) struct PageContext<T> {
    pub query: Arc<dyn QueryBuilder<T>>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub splitter: Arc<dyn ResponseSplitter>,
    pub resolver: Arc<dyn TotalPagesResolver>,
    pub sink: Arc<dyn RawSink>,
    pub metrics: Metrics,
    pub params_digest: String,
    /// Fingerprint scope: params digest narrowed by the since window.
    pub scope: String,
    pub params_json: String,
}

/// One (batch, page) unit of work.
pub(crate) struct PageTask<T> {
    pub batch: Arc<InputBatch<T>>,
    pub pager: Pager,
}

/// What a finished page task hands back to the scheduler.
pub(crate) struct PageOutcome<T> {
    pub batch_seq: u64,
    pub page: u64,
    pub records: usize,
    /// The following page of the same batch, if the batch is not done.
    pub next: Option<PageTask<T>>,
}

/// Decrements the in-flight gauge however the task ends.
struct InFlight<'a>(&'a Metrics);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a Metrics) -> Self {
        metrics.task_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

impl<T: InputKey> PageTask<T> {
    pub fn first(batch: Arc<InputBatch<T>>, page_size: u64) -> Self {
        Self {
            batch,
            pager: Pager::first(page_size),
        }
    }

    /// build -> fetch -> split -> resolve -> store -> stop check.
    pub async fn run(self, ctx: Arc<PageContext<T>>) -> Result<PageOutcome<T>, CollectorError> {
        let _in_flight = InFlight::enter(&ctx.metrics);
        let PageTask { batch, mut pager } = self;
        let (seq, page) = (batch.seq(), pager.page);

        let request = ctx
            .query
            .build(&batch, &pager)
            .map_err(|source| CollectorError::Query {
                batch: seq,
                page,
                source,
            })?;

        let response = ctx
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| CollectorError::Fetch {
                batch: seq,
                page,
                source,
            })?;
        ctx.metrics.increment_pages();

        let payloads = ctx
            .splitter
            .split(&response.body)
            .map_err(|source| CollectorError::Parse {
                batch: seq,
                page,
                source,
            })?;

        let total = ctx.resolver.resolve(&response.body, &pager);
        if page == 0 && total == TotalPages::Unknown {
            debug!(batch = seq, "Total pages unknown, paginating until an empty page");
        }
        pager.observe(total);

        let collected_at = Utc::now();
        let records: Vec<RawRecord> = payloads
            .into_iter()
            .enumerate()
            .map(|(idx, payload)| RawRecord {
                fingerprint: fingerprint(&ctx.scope, batch.digest(), page, idx as u64),
                params_digest: ctx.params_digest.clone(),
                params: ctx.params_json.clone(),
                batch_digest: batch.digest().to_string(),
                page_index: page,
                record_index: idx as u64,
                input: batch.input().to_string(),
                url: response.url.clone(),
                payload,
                collected_at,
            })
            .collect();

        let count = records.len();
        if count > 0 {
            ctx.sink
                .store(&records)
                .await
                .map_err(|source| CollectorError::Persistence {
                    batch: seq,
                    page,
                    source,
                })?;
            let bytes = records.iter().map(|r| r.payload.len() as u64).sum();
            ctx.metrics.increment_records(count as u64, bytes);
        }

        debug!(
            batch = seq,
            page,
            records = count,
            total_pages = ?pager.total_pages,
            url = %response.url,
            "Page collected"
        );

        let next = if pager.is_last(count) {
            None
        } else {
            Some(PageTask {
                batch,
                pager: pager.next(),
            })
        };

        Ok(PageOutcome {
            batch_seq: seq,
            page,
            records: count,
            next,
        })
    }
}
