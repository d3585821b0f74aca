use crate::{connectors::fetcher::PageRequest, error::QueryError};
use chrono::{DateTime, Utc};
use model::{
    core::params::CollectorParams,
    pagination::pager::Pager,
    records::batch::{InputBatch, InputKey},
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Maps one input batch and its pagination state to a remote request.
///
/// Implementations must be deterministic and must put every item of the
/// batch into the same request.
pub trait QueryBuilder<T>: Send + Sync {
    fn build(&self, batch: &InputBatch<T>, pager: &Pager) -> Result<PageRequest, QueryError>;
}

impl<T, F> QueryBuilder<T> for F
where
    F: Fn(&InputBatch<T>, &Pager) -> Result<PageRequest, QueryError> + Send + Sync,
{
    fn build(&self, batch: &InputBatch<T>, pager: &Pager) -> Result<PageRequest, QueryError> {
        self(batch, pager)
    }
}

/// How the pagination offset is expressed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetKind {
    /// Number of records to skip (`page * size`).
    #[default]
    Skip,
    /// One-based page number.
    Page,
}

/// Placeholders owned by the builder; params may not shadow them.
const RESERVED_PLACEHOLDERS: [&str; 2] = ["keys", "since"];

fn default_key_template() -> String {
    "{key}".to_string()
}

fn default_key_separator() -> String {
    ",".to_string()
}

fn default_since_format() -> String {
    "%Y/%m/%d %H:%M".to_string()
}

fn default_offset_param() -> String {
    "startAt".to_string()
}

fn default_size_param() -> String {
    "maxResults".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestTemplate {
    /// Request path relative to the API base. `{name}` placeholders are
    /// filled from the collector params.
    #[serde(default)]
    pub path: String,

    pub filter_param: String,

    /// Filter expression. `{keys}` receives the rendered batch and
    /// `{since}` the rendered since clause (empty without a bound).
    pub filter_template: String,

    #[serde(default)]
    pub since_clause: Option<String>,

    #[serde(default = "default_since_format")]
    pub since_format: String,

    #[serde(default = "default_key_template")]
    pub key_template: String,

    #[serde(default = "default_key_separator")]
    pub key_separator: String,

    #[serde(default = "default_offset_param")]
    pub offset_param: String,

    #[serde(default)]
    pub offset_kind: OffsetKind,

    #[serde(default = "default_size_param")]
    pub size_param: String,

    /// Constant query parameters, e.g. `expand=changelog`.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Template-driven query builder: one filter parameter embedding the batch
/// keys, plus offset and size parameters.
#[derive(Debug, Clone)]
pub struct FilterQueryBuilder {
    path: String,
    filter_param: String,
    filter: String,
    key_template: String,
    key_separator: String,
    offset_param: String,
    offset_kind: OffsetKind,
    size_param: String,
    extra: Vec<(String, String)>,
}

impl FilterQueryBuilder {
    /// Fixes everything that does not depend on the batch or the page:
    /// params placeholders and the since clause are rendered once here.
    pub fn new(
        template: &RequestTemplate,
        params: &CollectorParams,
        since: Option<DateTime<Utc>>,
    ) -> Result<Self, QueryError> {
        if !template.filter_template.contains("{keys}") {
            return Err(QueryError::Template(format!(
                "filter template '{}' has no {{keys}} placeholder",
                template.filter_template
            )));
        }
        if !template.key_template.contains("{key}") {
            return Err(QueryError::Template(format!(
                "key template '{}' has no {{key}} placeholder",
                template.key_template
            )));
        }
        if let Some(name) = RESERVED_PLACEHOLDERS
            .into_iter()
            .find(|name| params.get(name).is_some())
        {
            return Err(QueryError::Template(format!(
                "param '{name}' collides with the {{{name}}} placeholder"
            )));
        }

        let since_clause = match (since, &template.since_clause) {
            (Some(ts), Some(clause)) => {
                let formatted = ts.format(&template.since_format).to_string();
                clause.replace("{since}", &formatted)
            }
            (Some(_), None) => {
                return Err(QueryError::Template(
                    "a since bound was given but the request has no since_clause".to_string(),
                ));
            }
            (None, _) => String::new(),
        };

        let filter = render_params(&template.filter_template, params)
            .replace("{since}", &since_clause);

        Ok(Self {
            path: render_params(&template.path, params),
            filter_param: template.filter_param.clone(),
            filter,
            key_template: template.key_template.clone(),
            key_separator: template.key_separator.clone(),
            offset_param: template.offset_param.clone(),
            offset_kind: template.offset_kind,
            size_param: template.size_param.clone(),
            extra: template
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), render_params(v, params)))
                .collect(),
        })
    }

    fn render_keys<T: InputKey>(&self, batch: &InputBatch<T>) -> String {
        batch
            .items()
            .iter()
            .map(|key| self.key_template.replace("{key}", &key.to_string()))
            .collect::<Vec<_>>()
            .join(&self.key_separator)
    }
}

impl<T: InputKey> QueryBuilder<T> for FilterQueryBuilder {
    fn build(&self, batch: &InputBatch<T>, pager: &Pager) -> Result<PageRequest, QueryError> {
        if batch.is_empty() {
            return Err(QueryError::Render(format!(
                "batch #{} has no keys",
                batch.seq()
            )));
        }

        let filter = self.filter.replace("{keys}", &self.render_keys(batch));
        let offset = match self.offset_kind {
            OffsetKind::Skip => pager.skip(),
            OffsetKind::Page => pager.page + 1,
        };

        let mut request = PageRequest::new(self.path.clone())
            .param(self.filter_param.clone(), filter.trim())
            .param(self.offset_param.clone(), offset)
            .param(self.size_param.clone(), pager.size);
        request.query.extend(self.extra.iter().cloned());

        Ok(request)
    }
}

/// Replaces `{name}` with the value of param `name`. Unknown placeholders
/// are left alone so `{keys}` and `{since}` survive; params named after
/// them are rejected in [`FilterQueryBuilder::new`].
fn render_params(template: &str, params: &CollectorParams) -> String {
    params.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), &value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template() -> RequestTemplate {
        serde_json::from_value(serde_json::json!({
            "path": "api/2/search",
            "filter_param": "jql",
            "filter_template": "issue in ({keys}) {since}ORDER BY created ASC",
            "since_clause": "AND updated >= '{since}' ",
            "extra": { "expand": "changelog" }
        }))
        .unwrap()
    }

    fn params() -> CollectorParams {
        CollectorParams::new()
            .with("connection_id", 1i64)
            .with("board_id", 8i64)
    }

    fn batch() -> InputBatch<String> {
        InputBatch::new(0, vec!["EPIC-1".to_string(), "EPIC-7".to_string()]).unwrap()
    }

    #[test]
    fn encodes_whole_batch_and_pager() {
        let builder = FilterQueryBuilder::new(&template(), &params(), None).unwrap();
        let mut pager = Pager::first(100);
        pager = pager.next();

        let request = builder.build(&batch(), &pager).unwrap();
        assert_eq!(request.path, "api/2/search");
        assert_eq!(
            request.get("jql"),
            Some("issue in (EPIC-1,EPIC-7) ORDER BY created ASC")
        );
        assert_eq!(request.get("startAt"), Some("100"));
        assert_eq!(request.get("maxResults"), Some("100"));
        assert_eq!(request.get("expand"), Some("changelog"));
    }

    #[test]
    fn renders_since_bound() {
        let since = Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        let builder = FilterQueryBuilder::new(&template(), &params(), Some(since)).unwrap();

        let request = builder.build(&batch(), &Pager::first(50)).unwrap();
        assert_eq!(
            request.get("jql"),
            Some("issue in (EPIC-1,EPIC-7) AND updated >= '2024/03/05 09:30' ORDER BY created ASC")
        );
    }

    #[test]
    fn is_deterministic() {
        let builder = FilterQueryBuilder::new(&template(), &params(), None).unwrap();
        let pager = Pager::first(10);
        assert_eq!(
            builder.build(&batch(), &pager).unwrap(),
            builder.build(&batch(), &pager).unwrap()
        );
    }

    #[test]
    fn fills_path_from_params_and_quotes_keys() {
        let mut tpl = template();
        tpl.path = "agile/1.0/board/{board_id}/issue".to_string();
        tpl.key_template = "\"{key}\"".to_string();
        tpl.offset_kind = OffsetKind::Page;

        let builder = FilterQueryBuilder::new(&tpl, &params(), None).unwrap();
        let request = builder.build(&batch(), &Pager::first(10)).unwrap();

        assert_eq!(request.path, "agile/1.0/board/8/issue");
        assert_eq!(
            request.get("jql"),
            Some("issue in (\"EPIC-1\",\"EPIC-7\") ORDER BY created ASC")
        );
        assert_eq!(request.get("startAt"), Some("1"));
    }

    #[test]
    fn rejects_template_without_keys() {
        let mut tpl = template();
        tpl.filter_template = "ORDER BY created".to_string();
        assert!(matches!(
            FilterQueryBuilder::new(&tpl, &params(), None),
            Err(QueryError::Template(_))
        ));
    }

    #[test]
    fn rejects_params_shadowing_placeholders() {
        for name in ["keys", "since"] {
            let shadowing = params().with(name, "x");
            let err = FilterQueryBuilder::new(&template(), &shadowing, None).unwrap_err();
            assert!(
                matches!(&err, QueryError::Template(msg) if msg.contains(name)),
                "{err}"
            );
        }

        // Other names are still substituted.
        let mut tpl = template();
        tpl.filter_template = "project = {project} AND issue in ({keys})".to_string();
        let builder =
            FilterQueryBuilder::new(&tpl, &params().with("project", "CORE"), None).unwrap();
        let request = builder.build(&batch(), &Pager::first(10)).unwrap();
        assert_eq!(
            request.get("jql"),
            Some("project = CORE AND issue in (EPIC-1,EPIC-7)")
        );
    }

    #[test]
    fn closures_are_query_builders() {
        let build = |batch: &InputBatch<String>, pager: &Pager| {
            Ok::<_, QueryError>(
                PageRequest::new("items")
                    .param("ids", batch.join("|"))
                    .param("page", pager.page),
            )
        };
        let request = QueryBuilder::build(&build, &batch(), &Pager::first(1)).unwrap();
        assert_eq!(request.to_string(), "items?ids=EPIC-1|EPIC-7&page=0");
    }
}
