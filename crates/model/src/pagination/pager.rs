use serde::{Deserialize, Serialize};

/// Total page count as reported (or not) by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalPages {
    Known(u64),
    Unknown,
}

/// Pagination state of one input batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    /// Zero-based page index.
    pub page: u64,

    /// Records per page requested from the remote side.
    pub size: u64,

    /// Set once by the first response carrying pagination metadata.
    pub total_pages: Option<u64>,
}

impl Pager {
    pub fn first(size: u64) -> Self {
        Self {
            page: 0,
            size,
            total_pages: None,
        }
    }

    /// Offset of the first record of the current page.
    pub fn skip(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    /// Records the total reported by a response. The first known value
    /// wins; later responses cannot move the end of the batch.
    pub fn observe(&mut self, total: TotalPages) {
        if self.total_pages.is_none()
            && let TotalPages::Known(n) = total
        {
            self.total_pages = Some(n);
        }
    }

    /// Whether the current page is the last one of the batch, given the
    /// number of records it returned.
    ///
    /// An empty page always ends the batch. A known total ends it at page
    /// `total - 1`, and a total below one means there are no pages at all.
    pub fn is_last(&self, records_on_page: usize) -> bool {
        if records_on_page == 0 {
            return true;
        }

        match self.total_pages {
            Some(total) => total < 1 || self.page + 1 >= total,
            None => false,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..*self
        }
    }
}
