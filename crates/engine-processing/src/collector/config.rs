use crate::error::CollectorError;
use chrono::{DateTime, Utc};
use engine_config::settings::CollectorSettings;

/// Scheduling knobs of one collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Input keys per remote request.
    pub batch_size: usize,

    /// Upper bound on page tasks running at the same time.
    pub concurrency: usize,

    /// Records per page requested from the remote side.
    pub page_size: u64,

    /// Incremental runs keep previously stored rows; full sweeps purge
    /// the rows of the same params first.
    pub incremental: bool,

    /// Lower bound the query builder filters on. Records of different
    /// windows get distinct fingerprints.
    pub since: Option<DateTime<Utc>>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 10,
            page_size: 100,
            incremental: false,
            since: None,
        }
    }
}

impl CollectorConfig {
    pub fn from_settings(settings: &CollectorSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            concurrency: settings.concurrency,
            page_size: settings.page_size,
            incremental: settings.incremental,
            since: settings.since,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = size;
        self
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.batch_size == 0 {
            return Err(CollectorError::Config("batch_size must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(CollectorError::Config("concurrency must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(CollectorError::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }
}
