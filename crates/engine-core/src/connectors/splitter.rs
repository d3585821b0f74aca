use crate::{connectors::json, error::ParseError};
use serde::Deserialize;
use serde_json::value::RawValue;

/// Parses one response body into its ordered raw records.
pub trait ResponseSplitter: Send + Sync {
    fn split(&self, body: &[u8]) -> Result<Vec<Vec<u8>>, ParseError>;
}

/// Splits the JSON array found under a (dotted) field of the body.
///
/// Each element is kept exactly as it appears in the response. A missing
/// or `null` field is an empty page. An empty field name means the body is
/// the array itself.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonFieldSplitter {
    pub field: String,
}

impl JsonFieldSplitter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl ResponseSplitter for JsonFieldSplitter {
    fn split(&self, body: &[u8]) -> Result<Vec<Vec<u8>>, ParseError> {
        let text = std::str::from_utf8(body).map_err(|e| {
            ParseError::Json(serde::de::Error::custom(format!("body is not UTF-8: {e}")))
        })?;

        let Some(raw) = json::select(text, &self.field)? else {
            return Ok(Vec::new());
        };
        if json::is_null(raw) {
            return Ok(Vec::new());
        }
        if !raw.get().trim_start().starts_with('[') {
            return Err(ParseError::NotAnArray(self.field.clone()));
        }

        let items: Vec<&RawValue> = serde_json::from_str(raw.get())?;
        Ok(items
            .into_iter()
            .map(|item| item.get().as_bytes().to_vec())
            .collect())
    }
}
