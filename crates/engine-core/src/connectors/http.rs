use crate::{
    connectors::fetcher::{PageFetcher, PageRequest, PageResponse},
    error::FetchError,
    retry::{RetryDisposition, RetryError, RetryPolicy, RetrySettings},
};
use async_trait::async_trait;
use reqwest::{
    Client, StatusCode, Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;

/// Longest error body kept in a [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 512;

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Base URL the request paths are joined onto. Should end with `/`.
    pub base_url: String,

    /// Static headers sent with every request, e.g. `Authorization`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Page fetcher over HTTP GET, retrying transient failures.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpPageFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| FetchError::InvalidUrl {
            url: config.base_url.clone(),
            message: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Config(format!("header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Config(format!("header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url_for(&self, request: &PageRequest) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&request.path)
            .map_err(|e| FetchError::InvalidUrl {
                url: request.path.clone(),
                message: e.to_string(),
            })?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn get_once(&self, url: &Url) -> Result<PageResponse, FetchError> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let body = resp.bytes().await?;
        Ok(PageResponse {
            url: url.to_string(),
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, FetchError> {
        let url = self.url_for(request)?;
        debug!(url = %url, "GET");

        match self
            .retry
            .run(|| self.get_once(&url), classify_fetch_error)
            .await
        {
            Ok(resp) => Ok(resp),
            Err(RetryError::Fatal(e)) => Err(e),
            Err(RetryError::AttemptsExceeded(e)) => Err(FetchError::RetriesExhausted {
                attempts: self.retry.max_attempts,
                source: Box::new(e),
            }),
        }
    }
}

pub fn classify_fetch_error(err: &FetchError) -> RetryDisposition {
    match err {
        FetchError::Transport(e) => {
            if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                RetryDisposition::Retry
            } else {
                RetryDisposition::Stop
            }
        }
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::InvalidUrl { .. } => RetryDisposition::Stop,
        FetchError::RetriesExhausted { .. } => RetryDisposition::Stop,
        FetchError::Config(_) => RetryDisposition::Stop,
        FetchError::Other(_) => RetryDisposition::Stop,
    }
}

fn classify_status(status: u16) -> RetryDisposition {
    match StatusCode::from_u16(status) {
        Ok(StatusCode::TOO_MANY_REQUESTS) | Ok(StatusCode::REQUEST_TIMEOUT) => {
            RetryDisposition::Retry
        }
        Ok(code) if code.is_server_error() => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> HttpConfig {
        HttpConfig {
            base_url: base_url.to_string(),
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
            timeout_secs: 5,
            user_agent: default_user_agent(),
            retry: RetrySettings::default(),
        }
    }

    #[test]
    fn joins_path_and_encodes_query() {
        let fetcher = HttpPageFetcher::new(&config("https://jira.example.com/rest/")).unwrap();
        let request = PageRequest::new("api/2/search")
            .param("jql", "issue in (A-1,A-2) ORDER BY created ASC")
            .param("startAt", 0);

        let url = fetcher.url_for(&request).unwrap();
        assert_eq!(url.path(), "/rest/api/2/search");
        assert_eq!(
            url.query(),
            Some("jql=issue+in+%28A-1%2CA-2%29+ORDER+BY+created+ASC&startAt=0")
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(matches!(
            HttpPageFetcher::new(&config("not a url")),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn retries_rate_limits_and_server_errors_only() {
        let status = |status| FetchError::Status {
            status,
            url: String::new(),
            body: String::new(),
        };
        assert_eq!(classify_fetch_error(&status(429)), RetryDisposition::Retry);
        assert_eq!(classify_fetch_error(&status(503)), RetryDisposition::Retry);
        assert_eq!(classify_fetch_error(&status(401)), RetryDisposition::Stop);
        assert_eq!(classify_fetch_error(&status(404)), RetryDisposition::Stop);
    }
}
