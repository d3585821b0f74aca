use crate::{error::RunError, execution::factory};
use chrono::{DateTime, Utc};
use connectors::cursor::RowCursor;
use engine_config::{
    env::EnvManager,
    job::{ColumnType, JobConfig},
};
use engine_core::{
    connectors::{fetcher::PageFetcher, sink::RawSink},
    state::{StateStore, Watermark},
};
use engine_processing::collector::{CollectSummary, Collector, CollectorConfig};
use model::records::batch::InputKey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one job run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_key: String,
    pub summary: CollectSummary,
    /// Lower time bound the requests were built with.
    pub since: Option<DateTime<Utc>>,
    /// Watermark stored for the next incremental run.
    pub watermark: Option<Watermark>,
}

/// Opens the input query of `job` and runs it to completion.
pub async fn run(job: JobConfig, cancel: CancellationToken) -> Result<RunReport, RunError> {
    JobExecutor::new(job, cancel).execute().await
}

/// Wires a [`JobConfig`] into a [`Collector`].
///
/// Components default to what the job describes; the `with_*` methods
/// replace them, which is how the runtime is driven without a live API.
pub struct JobExecutor {
    job: JobConfig,
    cancel: CancellationToken,
    fetcher: Option<Arc<dyn PageFetcher>>,
    sink: Option<Arc<dyn RawSink>>,
    state: Option<Arc<dyn StateStore>>,
}

impl JobExecutor {
    pub fn new(job: JobConfig, cancel: CancellationToken) -> Self {
        Self {
            job,
            cancel,
            fetcher: None,
            sink: None,
            state: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RawSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub async fn execute(self) -> Result<RunReport, RunError> {
        info!(
            job = %self.job.name,
            column_type = ?self.job.source.column_type,
            "Opening input query"
        );

        match self.job.source.column_type {
            ColumnType::Text => {
                let cursor = factory::open_cursor::<String>(&self.job.source).await?;
                self.execute_with_cursor(cursor).await
            }
            ColumnType::Int8 => {
                let cursor = factory::open_cursor::<i64>(&self.job.source).await?;
                self.execute_with_cursor(cursor).await
            }
        }
    }

    /// Runs the job over an already opened cursor of input keys.
    pub async fn execute_with_cursor<T: InputKey>(
        self,
        cursor: Box<dyn RowCursor<T>>,
    ) -> Result<RunReport, RunError> {
        let job = &self.job;
        let settings = job.settings()?;
        let job_key = job.job_key();
        let started_at = Utc::now();

        let state = if settings.incremental {
            match self.state.clone() {
                Some(state) => Some(state),
                None => factory::create_state_store(&job.state)?,
            }
        } else {
            None
        };

        let previous = match &state {
            Some(state) => state.load_watermark(&job_key).await?,
            None => None,
        };
        let since = settings.effective_since(previous.as_ref().map(|w| w.since));

        if let Some(previous) = &previous {
            info!(
                job = %job_key,
                since = %previous.since,
                "Resuming from watermark"
            );
        }

        self.log_job(since);

        let fetcher = match self.fetcher.clone() {
            Some(fetcher) => fetcher,
            None => factory::create_fetcher(&job.api)?,
        };
        let sink = match self.sink.clone() {
            Some(sink) => sink,
            None => factory::create_sink(&job.sink).await?,
        };

        let collector = Collector::<T>::new(
            CollectorConfig::from_settings(&settings).with_since(since),
            job.params.clone(),
            Arc::new(factory::create_query_builder(job, since)?),
            fetcher,
            factory::create_splitter(job),
            factory::create_resolver(job)?,
            sink,
        )?
        .with_cancel(self.cancel.clone());

        let summary = collector.collect(cursor).await?;

        let watermark = match &state {
            Some(state) => {
                let watermark = Watermark {
                    job_key: job_key.clone(),
                    since: started_at,
                    records: summary.records,
                    updated_at: Utc::now(),
                };
                state.save_watermark(&watermark).await?;
                info!(job = %job_key, since = %watermark.since, "Watermark saved");
                Some(watermark)
            }
            None => None,
        };

        Ok(RunReport {
            job_key,
            summary,
            since,
            watermark,
        })
    }

    fn log_job(&self, since: Option<DateTime<Utc>>) {
        let env = EnvManager::from_vars(Vec::new());
        let headers = self
            .job
            .api
            .http
            .headers
            .iter()
            .map(|(name, value)| {
                if env.is_sensitive(name) {
                    format!("{name}: ***")
                } else {
                    format!("{name}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        info!(
            job = %self.job.name,
            base_url = %self.job.api.http.base_url,
            path = %self.job.api.url_template,
            headers = %headers,
            table = %self.job.sink.table(),
            since = ?since,
            "Job configured"
        );

        if self.job.params.is_empty() {
            warn!(job = %self.job.name, "Job has no params; raw rows of all runs share one scope");
        }
    }
}
