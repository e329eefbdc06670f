//! Pagination types for listing results.
//!
//! Listings use offset pagination: a 1-based page number and a page size.
//! The [`Paginated`] envelope always exposes `data`, `total`, `per_page` and
//! `current_page`, whatever the engine.

use serde::{Deserialize, Serialize};

/// Which page to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
}

impl PageRequest {
    /// Creates a page request. Page 0 is treated as page 1 and the size is
    /// at least 1.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    /// Number of records skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    /// Page size as a row limit.
    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Records on this page.
    pub data: Vec<T>,
    /// Total number of records matching the query.
    pub total: u64,
    /// Page size.
    pub per_page: u32,
    /// 1-based page number.
    pub current_page: u32,
    /// Last page number; 1 for an empty result.
    pub last_page: u32,
}

impl<T> Paginated<T> {
    /// Builds the envelope for a fetched page.
    pub fn new(data: Vec<T>, total: u64, page: PageRequest) -> Self {
        let last_page = total.div_ceil(u64::from(page.per_page)).max(1);
        Self {
            data,
            total,
            per_page: page.per_page,
            current_page: page.page,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        }
    }

    /// Whether a page follows this one.
    pub fn has_more(&self) -> bool {
        self.current_page < self.last_page
    }

    /// Maps the records, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
        }
    }
}
