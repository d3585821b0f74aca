use crate::{
    batcher::CursorBatcher,
    collector::task::{PageContext, PageOutcome, PageTask},
    error::CollectorError,
};
use connectors::cursor::RowCursor;
use engine_core::{
    connectors::{
        fetcher::PageFetcher, query::QueryBuilder, sink::RawSink, splitter::ResponseSplitter,
        total_pages::TotalPagesResolver,
    },
    metrics::{Metrics, MetricsSnapshot},
};
use model::{
    core::params::CollectorParams,
    records::{batch::InputKey, raw::scope_digest},
};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
mod task;

pub use config::CollectorConfig;

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectSummary {
    pub batches: u64,
    pub pages: u64,
    pub records: u64,
    pub bytes: u64,
    pub tasks: u64,
    pub peak_concurrency: u64,
    pub elapsed: Duration,
}

impl CollectSummary {
    fn new(snapshot: MetricsSnapshot, elapsed: Duration) -> Self {
        Self {
            batches: snapshot.batches_completed,
            pages: snapshot.pages_fetched,
            records: snapshot.records_stored,
            bytes: snapshot.bytes_stored,
            tasks: snapshot.tasks_started,
            peak_concurrency: snapshot.peak_in_flight,
            elapsed,
        }
    }
}

/// Walks the pages of every input batch with a bounded pool of tasks.
///
/// Pages of one batch run strictly one after the other: page `k + 1` is
/// only scheduled once page `k` has been stored and did not end the batch.
/// Different batches interleave freely. A free slot goes to a pending next
/// page before a new batch is pulled from the cursor.
///
/// The first failure stops all scheduling: queued pages are dropped, no
/// further batch is pulled, running tasks are awaited, and that first error
/// is returned. Cancellation behaves the same way and yields
/// [`CollectorError::Cancelled`].
pub struct Collector<T> {
    config: CollectorConfig,
    params: CollectorParams,
    ctx: Arc<PageContext<T>>,
    cancel: CancellationToken,
}

impl<T: InputKey> Collector<T> {
    pub fn new(
        config: CollectorConfig,
        params: CollectorParams,
        query: Arc<dyn QueryBuilder<T>>,
        fetcher: Arc<dyn PageFetcher>,
        splitter: Arc<dyn ResponseSplitter>,
        resolver: Arc<dyn TotalPagesResolver>,
        sink: Arc<dyn RawSink>,
    ) -> Result<Self, CollectorError> {
        config.validate()?;

        let params_digest = params.digest();
        let ctx = PageContext {
            query,
            fetcher,
            splitter,
            resolver,
            sink,
            metrics: Metrics::new(),
            scope: scope_digest(&params_digest, config.since.as_ref()),
            params_digest,
            params_json: params.canonical_json(),
        };

        Ok(Self {
            config,
            params,
            ctx: Arc::new(ctx),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn metrics(&self) -> Metrics {
        self.ctx.metrics.clone()
    }

    /// Batches `cursor` with the configured batch size and collects.
    pub async fn collect(
        &self,
        cursor: Box<dyn RowCursor<T>>,
    ) -> Result<CollectSummary, CollectorError> {
        let batcher = CursorBatcher::new(cursor, self.config.batch_size)?;
        self.run(batcher).await
    }

    pub async fn run(
        &self,
        mut batcher: CursorBatcher<T>,
    ) -> Result<CollectSummary, CollectorError> {
        let started = Instant::now();
        let purge = !self.config.incremental;

        info!(
            params = %self.params.canonical_json(),
            batch_size = batcher.batch_size(),
            concurrency = self.config.concurrency,
            page_size = self.config.page_size,
            incremental = self.config.incremental,
            since = ?self.config.since,
            "Starting collection"
        );

        if let Err(e) = self.ctx.sink.prepare(&self.ctx.params_digest, purge).await {
            if let Err(close_err) = batcher.close().await {
                warn!(error = %close_err, "Failed to close input cursor");
            }
            return Err(CollectorError::Prepare(e));
        }

        let failure = self.schedule(&mut batcher).await;

        match batcher.close().await {
            Ok(()) => {}
            Err(e) if failure.is_some() => warn!(error = %e, "Failed to close input cursor"),
            Err(e) => return Err(e.into()),
        }

        if let Some(e) = failure {
            error!(error = %e, "Collection failed");
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            warn!("Collection cancelled before completion");
            return Err(CollectorError::Cancelled);
        }

        let summary = CollectSummary::new(self.ctx.metrics.snapshot(), started.elapsed());
        info!(
            batches = summary.batches,
            pages = summary.pages,
            records = summary.records,
            peak_concurrency = summary.peak_concurrency,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Collection finished"
        );
        Ok(summary)
    }

    /// Scheduling loop. Returns the first failure, if any.
    async fn schedule(&self, batcher: &mut CursorBatcher<T>) -> Option<CollectorError> {
        let metrics = &self.ctx.metrics;
        let mut tasks: JoinSet<Result<PageOutcome<T>, CollectorError>> = JoinSet::new();
        let mut ready: VecDeque<PageTask<T>> = VecDeque::new();
        let mut exhausted = false;
        let mut failure: Option<CollectorError> = None;

        loop {
            while failure.is_none()
                && !self.cancel.is_cancelled()
                && tasks.len() < self.config.concurrency
            {
                if let Some(task) = ready.pop_front() {
                    tasks.spawn(task.run(self.ctx.clone()));
                    continue;
                }
                if exhausted {
                    break;
                }

                match batcher.next_batch().await {
                    Ok(Some(batch)) => {
                        metrics.increment_batches_pulled();
                        info!(batch = batch.seq(), keys = batch.len(), "Collecting batch");
                        let task = PageTask::first(Arc::new(batch), self.config.page_size);
                        tasks.spawn(task.run(self.ctx.clone()));
                    }
                    Ok(None) => exhausted = true,
                    Err(e) => failure = Some(e.into()),
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            self.settle(joined, &mut ready, &mut failure, tasks.len());

            // Queue the next pages of every finished task before any slot
            // is refilled.
            while let Some(joined) = tasks.try_join_next() {
                self.settle(joined, &mut ready, &mut failure, tasks.len());
            }
        }

        if !ready.is_empty() {
            warn!(discarded = ready.len(), "Dropped pending pages");
        }

        failure
    }

    /// Folds one finished page task into the scheduler state.
    fn settle(
        &self,
        joined: Result<Result<PageOutcome<T>, CollectorError>, JoinError>,
        ready: &mut VecDeque<PageTask<T>>,
        failure: &mut Option<CollectorError>,
        in_flight: usize,
    ) {
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => Err(CollectorError::TaskJoin(join_err)),
        };

        match result {
            Ok(outcome) => match outcome.next {
                Some(next) => {
                    if failure.is_none() && !self.cancel.is_cancelled() {
                        ready.push_back(next);
                    }
                }
                None => {
                    self.ctx.metrics.increment_batches_completed();
                    info!(
                        batch = outcome.batch_seq,
                        pages = outcome.page + 1,
                        last_page_records = outcome.records,
                        "Batch complete"
                    );
                }
            },
            Err(e) => {
                if failure.is_none() {
                    error!(error = %e, in_flight, "Page task failed, draining");
                    *failure = Some(e);
                } else {
                    warn!(error = %e, "Further page task failure while draining");
                }
            }
        }
    }
}
