use crate::connectors::json;
use model::pagination::pager::{Pager, TotalPages};
use tracing::warn;

/// Derives the number of pages of the current batch from a response.
///
/// Never fails: anything that cannot be determined is `Unknown`, and the
/// collector then stops on the first empty page.
pub trait TotalPagesResolver: Send + Sync {
    fn resolve(&self, body: &[u8], pager: &Pager) -> TotalPages;
}

/// Resolver for APIs without pagination metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownTotalPages;

impl TotalPagesResolver for UnknownTotalPages {
    fn resolve(&self, _body: &[u8], _pager: &Pager) -> TotalPages {
        TotalPages::Unknown
    }
}

/// Computes `ceil(total / size)` from a total record count in the body.
/// The page size is read from `page_size_field` when set and present,
/// otherwise the size the pager requested is used.
#[derive(Debug, Clone)]
pub struct RecordCountResolver {
    pub total_field: String,
    pub page_size_field: Option<String>,
}

impl TotalPagesResolver for RecordCountResolver {
    fn resolve(&self, body: &[u8], pager: &Pager) -> TotalPages {
        let Ok(text) = std::str::from_utf8(body) else {
            return TotalPages::Unknown;
        };

        let total = match json::select_u64(text, &self.total_field) {
            Ok(Some(total)) => total,
            Ok(None) => return TotalPages::Unknown,
            Err(e) => {
                warn!(field = %self.total_field, error = %e, "Cannot read total");
                return TotalPages::Unknown;
            }
        };

        let size = self
            .page_size_field
            .as_deref()
            .and_then(|field| json::select_u64(text, field).ok().flatten())
            .filter(|size| *size > 0)
            .unwrap_or(pager.size);

        if size == 0 {
            return TotalPages::Unknown;
        }

        TotalPages::Known(total.div_ceil(size))
    }
}

/// Reads the page count directly from a field of the body.
#[derive(Debug, Clone)]
pub struct PageCountResolver {
    pub field: String,
}

impl TotalPagesResolver for PageCountResolver {
    fn resolve(&self, body: &[u8], _pager: &Pager) -> TotalPages {
        std::str::from_utf8(body)
            .ok()
            .and_then(|text| json::select_u64(text, &self.field).ok().flatten())
            .map_or(TotalPages::Unknown, TotalPages::Known)
    }
}

/// Which resolver a job uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TotalPagesConfig {
    #[default]
    Unknown,
    RecordCount {
        total_field: String,
        page_size_field: Option<String>,
    },
    PageCount {
        field: String,
    },
}

impl TotalPagesConfig {
    pub fn build(&self) -> Box<dyn TotalPagesResolver> {
        match self {
            TotalPagesConfig::Unknown => Box::new(UnknownTotalPages),
            TotalPagesConfig::RecordCount {
                total_field,
                page_size_field,
            } => Box::new(RecordCountResolver {
                total_field: total_field.clone(),
                page_size_field: page_size_field.clone(),
            }),
            TotalPagesConfig::PageCount { field } => Box::new(PageCountResolver {
                field: field.clone(),
            }),
        }
    }
}
