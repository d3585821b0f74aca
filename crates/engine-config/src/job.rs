use crate::{env::EnvManager, error::ConfigError, settings::CollectorSettings};
use chrono::{DateTime, Utc};
use engine_core::connectors::{
    http::HttpConfig, query::RequestTemplate, total_pages::TotalPagesConfig,
};
use model::core::{params::CollectorParams, value::Value};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Scalar type of the input query's single column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Int8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// PostgreSQL connection URL.
    pub url: String,

    /// Read-only query returning one column of distinct keys.
    pub query: String,

    /// Values bound to `$1`, `$2`, … of the query.
    #[serde(default)]
    pub bind: Vec<Value>,

    #[serde(default)]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Request path relative to `base_url`; may use `{param}` placeholders.
    pub url_template: String,

    #[serde(flatten)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseConfig {
    /// Dotted path of the records array. Empty when the body is the array.
    pub records_field: String,

    /// Total record count, turned into a page count with the page size.
    #[serde(default)]
    pub total_field: Option<String>,

    #[serde(default)]
    pub page_size_field: Option<String>,

    /// Page count reported directly by the API.
    #[serde(default)]
    pub page_count_field: Option<String>,
}

impl ResponseConfig {
    pub fn total_pages(&self) -> Result<TotalPagesConfig, ConfigError> {
        match (&self.total_field, &self.page_count_field) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "response.total_field and response.page_count_field are exclusive".to_string(),
            )),
            (Some(total_field), None) => Ok(TotalPagesConfig::RecordCount {
                total_field: total_field.clone(),
                page_size_field: self.page_size_field.clone(),
            }),
            (None, Some(field)) => Ok(TotalPagesConfig::PageCount {
                field: field.clone(),
            }),
            (None, None) => Ok(TotalPagesConfig::Unknown),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    Sled {
        /// Defaults to `~/.harvest/raw`.
        #[serde(default)]
        path: Option<PathBuf>,
        table: String,
    },
    Postgres {
        url: String,
        table: String,
    },
}

impl SinkConfig {
    pub fn table(&self) -> &str {
        match self {
            SinkConfig::Sled { table, .. } | SinkConfig::Postgres { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorSection {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incremental: bool,
}

fn default_true() -> bool {
    true
}

/// Where watermarks of incremental jobs are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to `~/.harvest/state`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl StateConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| harvest_dir().map(|d| d.join("state")))
    }
}

/// `~/.harvest`, the home of default sled databases.
pub fn harvest_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".harvest"))
}

/// One collection job as described by a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(default)]
    pub params: CollectorParams,

    pub source: SourceConfig,
    pub api: ApiConfig,
    pub request: RequestTemplate,
    pub response: ResponseConfig,
    pub sink: SinkConfig,

    #[serde(default)]
    pub collector: CollectorSection,

    #[serde(default)]
    pub state: StateConfig,
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>, env: &EnvManager) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded job file");
        Self::parse(&text, env)
    }

    /// Parses and validates a job. `${NAME}` references in string values
    /// are resolved against `env` before deserialization.
    pub fn parse(text: &str, env: &EnvManager) -> Result<Self, ConfigError> {
        let mut raw: serde_json::Value = serde_json::from_str(text)?;
        interpolate_value(&mut raw, env)?;

        let job: JobConfig = serde_json::from_value(raw)?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.source.query.trim().is_empty() {
            return Err(ConfigError::Invalid("source.query must not be empty".to_string()));
        }
        if !self.request.filter_template.contains("{keys}") {
            return Err(ConfigError::Invalid(
                "request.filter_template must contain {keys}".to_string(),
            ));
        }
        if self.sink.table().trim().is_empty() {
            return Err(ConfigError::Invalid("sink.table must not be empty".to_string()));
        }
        self.response.total_pages()?;

        let settings = self.settings()?;
        if settings.incremental {
            if !self.state.enabled {
                return Err(ConfigError::Invalid(
                    "incremental collection needs the watermark store (state.enabled)".to_string(),
                ));
            }
            if self.request.since_clause.is_none() {
                return Err(ConfigError::Invalid(
                    "incremental collection needs request.since_clause".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn settings(&self) -> Result<CollectorSettings, ConfigError> {
        CollectorSettings::from_section(&self.collector)
    }

    /// Request template with the path taken from `api.url_template`.
    pub fn request_template(&self) -> RequestTemplate {
        RequestTemplate {
            path: self.api.url_template.clone(),
            ..self.request.clone()
        }
    }

    /// Identity of the job in the watermark store: re-runs with the same
    /// name and params share it.
    pub fn job_key(&self) -> String {
        format!("{}:{}", self.name, self.params.digest())
    }
}

fn interpolate_value(value: &mut serde_json::Value, env: &EnvManager) -> Result<(), ConfigError> {
    match value {
        serde_json::Value::String(s) => {
            if s.contains('$') {
                *s = env.interpolate(s)?;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                interpolate_value(item, env)?;
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}
