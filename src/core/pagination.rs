//! Page-based pagination
//!
//! Pages are 1-based. A page past the end yields an empty result list, not an error.

use serde::Serialize;

/// Default page size when the client supplies none (or a non-positive one)
pub const DEFAULT_LIMIT: u32 = 10;

/// Upper bound on the page size
pub const MAX_LIMIT: u32 = 100;

/// Requested page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Build from raw query values, clamping anything out of range
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p.min(u32::MAX as i64) as u32,
            _ => 1,
        };
        let limit = match limit {
            Some(l) if l >= 1 => l.min(MAX_LIMIT as i64) as u32,
            _ => DEFAULT_LIMIT,
        };
        Self { page, limit }
    }

    /// Number of rows to skip
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub results: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub total_results: u64,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, total_results: u64, request: PageRequest) -> Self {
        Self {
            results,
            page: request.page,
            limit: request.limit,
            total_pages: total_results.div_ceil(request.limit as u64),
            total_results,
        }
    }

    /// Convert each result, keeping the totals
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            results: self.results.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
            total_results: self.total_results,
        }
    }
}
