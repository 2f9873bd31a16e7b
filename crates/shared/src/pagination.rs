//! Offset pagination utilities.

use serde::Serialize;

/// Default page size when the caller does not supply one.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page size a caller may request.
pub const MAX_LIMIT: i64 = 200;

/// Normalized limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Clamp raw query values into a usable page request.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }

    /// Build a page request from 1-based page numbering.
    pub fn from_page(page: Option<i64>, per_page: Option<i64>) -> Self {
        let per_page = per_page.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let page = page.unwrap_or(1).max(1);
        Self {
            limit: per_page,
            offset: (page - 1) * per_page,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Pagination metadata returned alongside list responses.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

impl PageInfo {
    pub fn new(request: PageRequest, returned: usize, total: i64) -> Self {
        Self {
            limit: request.limit,
            offset: request.offset,
            total,
            has_more: request.offset + (returned as i64) < total,
        }
    }
}
