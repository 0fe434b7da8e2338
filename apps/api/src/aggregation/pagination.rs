//! Pagination: normalizes raw `page` / `limit` query values and derives the
//! response metadata from a resolved window and the authority's total.

use serde::Serialize;

/// Per-endpoint pagination policy. `max_limit` varies by caller (50, 100, 200).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
}

/// A resolved, always-valid page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
}

impl PaginationPolicy {
    pub fn new(default_limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            default_limit: default_limit.clamp(1, max_limit),
            max_limit,
        }
    }

    /// Missing, empty, non-numeric, zero or negative input falls back to page 1 /
    /// the default limit. The limit is then clamped to `[1, max_limit]`.
    pub fn resolve(&self, page: Option<&str>, limit: Option<&str>) -> PageWindow {
        let page = parse_positive(page).unwrap_or(1);
        let limit = parse_positive(limit)
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);
        let offset = u64::from(page - 1) * u64::from(limit);

        let window = PageWindow {
            page,
            limit,
            offset,
        };
        debug_assert!(window.page >= 1);
        debug_assert!((1..=self.max_limit).contains(&window.limit));
        debug_assert_eq!(
            window.offset,
            u64::from(window.page - 1) * u64::from(window.limit)
        );
        window
    }
}

/// Parses a strictly positive integer. Fractions are truncated, values beyond
/// `u32::MAX` saturate.
fn parse_positive(raw: Option<&str>) -> Option<u32> {
    let raw = raw?.trim();
    let value = match raw.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let v = raw.parse::<f64>().ok().filter(|v| v.is_finite())?;
            v.trunc() as i64
        }
    };
    if value <= 0 {
        return None;
    }
    Some(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Pagination metadata computed from the record store's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PaginationState {
    pub fn new(window: PageWindow, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(window.limit));
        Self {
            page: window.page,
            limit: window.limit,
            offset: window.offset,
            total,
            total_pages,
            has_next_page: u64::from(window.page) < total_pages,
            has_prev_page: window.page > 1,
        }
    }
}
