use crate::error::RunError;
use connectors::{
    cursor::RowCursor,
    sql::postgres::{cursor::PgCursor, utils::connect_client},
};
use engine_config::job::{ApiConfig, JobConfig, SinkConfig, SourceConfig, StateConfig, harvest_dir};
use engine_core::{
    connectors::{
        fetcher::PageFetcher,
        http::HttpPageFetcher,
        query::FilterQueryBuilder,
        sink::{RawSink, postgres::PgRawSink, sled_sink::SledRawSink},
        splitter::{JsonFieldSplitter, ResponseSplitter},
        total_pages::TotalPagesResolver,
    },
    state::{StateStore, sled_store::SledStateStore},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_postgres::types::FromSql;
use tracing::info;

pub async fn open_cursor<T>(source: &SourceConfig) -> Result<Box<dyn RowCursor<T>>, RunError>
where
    T: for<'a> FromSql<'a> + Send + 'static,
{
    let client = connect_client(&source.url).await?;
    let cursor = PgCursor::<T>::open(client, source.query.clone(), source.bind.clone()).await?;
    Ok(Box::new(cursor))
}

pub fn create_fetcher(api: &ApiConfig) -> Result<Arc<dyn PageFetcher>, RunError> {
    Ok(Arc::new(HttpPageFetcher::new(&api.http)?))
}

pub fn create_query_builder(
    job: &JobConfig,
    since: Option<DateTime<Utc>>,
) -> Result<FilterQueryBuilder, RunError> {
    Ok(FilterQueryBuilder::new(
        &job.request_template(),
        &job.params,
        since,
    )?)
}

pub fn create_splitter(job: &JobConfig) -> Arc<dyn ResponseSplitter> {
    Arc::new(JsonFieldSplitter::new(job.response.records_field.clone()))
}

pub fn create_resolver(job: &JobConfig) -> Result<Arc<dyn TotalPagesResolver>, RunError> {
    Ok(Arc::from(job.response.total_pages()?.build()))
}

pub async fn create_sink(sink: &SinkConfig) -> Result<Arc<dyn RawSink>, RunError> {
    match sink {
        SinkConfig::Sled { path, table } => {
            let path = match path {
                Some(path) => path.clone(),
                None => harvest_dir()
                    .map(|dir| dir.join("raw"))
                    .ok_or_else(|| {
                        RunError::Initialization("Could not determine home directory".to_string())
                    })?,
            };
            info!(path = %path.display(), table = %table, "Opening sled raw sink");
            Ok(Arc::new(SledRawSink::open(path, table)?))
        }
        SinkConfig::Postgres { url, table } => {
            info!(table = %table, "Opening PostgreSQL raw sink");
            Ok(Arc::new(PgRawSink::connect(url, table).await?))
        }
    }
}

pub fn create_state_store(state: &StateConfig) -> Result<Option<Arc<dyn StateStore>>, RunError> {
    if !state.enabled {
        return Ok(None);
    }

    let path = state.resolved_path().ok_or_else(|| {
        RunError::Initialization("Could not determine home directory".to_string())
    })?;
    Ok(Some(Arc::new(SledStateStore::open(path)?)))
}
