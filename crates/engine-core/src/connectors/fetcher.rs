use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// One remote request, fully determined by the query builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Path relative to the API base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// Raw body of a successful response and the URL that produced it.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url: String,
    pub body: Bytes,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Issues the request and returns the body of a successful response.
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, FetchError>;
}
