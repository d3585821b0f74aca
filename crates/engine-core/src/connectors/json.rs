//! Dotted-path lookups into a JSON body that keep the selected value as
//! raw text, so records can be stored byte for byte.

use serde_json::value::RawValue;
use std::collections::HashMap;

/// Follows `path` (fields separated by `.`) from the top-level object of
/// `body`. An empty path selects the body itself. Returns `Ok(None)` when
/// a segment is missing or a non-object is met along the way.
pub fn select<'a>(body: &'a str, path: &str) -> Result<Option<&'a RawValue>, serde_json::Error> {
    let mut current: &'a RawValue = serde_json::from_str(body)?;

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let text = current.get().trim_start();
        if !text.starts_with('{') {
            return Ok(None);
        }
        let mut object: HashMap<String, &'a RawValue> = serde_json::from_str(current.get())?;
        match object.remove(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    Ok(Some(current))
}

pub fn is_null(value: &RawValue) -> bool {
    value.get().trim() == "null"
}

/// Reads the value at `path` as an unsigned integer. Numbers written as
/// floats (`42.0`) and numeric strings are accepted.
pub fn select_u64(body: &str, path: &str) -> Result<Option<u64>, serde_json::Error> {
    let Some(raw) = select(body, path)? else {
        return Ok(None);
    };

    let value: serde_json::Value = serde_json::from_str(raw.get())?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"total": 250, "page": {"size": "50"}, "issues": [{"id": 1}]}"#;

    #[test]
    fn selects_nested_fields_verbatim() {
        assert_eq!(select(BODY, "issues").unwrap().unwrap().get(), r#"[{"id": 1}]"#);
        assert_eq!(select(BODY, "page.size").unwrap().unwrap().get(), r#""50""#);
        assert!(select(BODY, "page.size.x").unwrap().is_none());
        assert!(select(BODY, "missing").unwrap().is_none());
    }

    #[test]
    fn reads_numbers_and_numeric_strings() {
        assert_eq!(select_u64(BODY, "total").unwrap(), Some(250));
        assert_eq!(select_u64(BODY, "page.size").unwrap(), Some(50));
        assert_eq!(select_u64(BODY, "issues").unwrap(), None);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(select("{not json", "").is_err());
    }
}
