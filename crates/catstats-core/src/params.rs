//! Per-request query parameters
//!
//! `$page` is 1-based on the wire: `page <= 1` addresses the first page.

use serde::{Deserialize, Serialize};

/// Page size used when `$limit` is absent or not positive
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page size a caller may request
pub const MAX_LIMIT: u32 = 1000;

/// Raw OData-style query parameters of one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<String>,
}

/// Clamp a requested page size into `[1, max]`, using `default` for `limit <= 0`
pub fn clamp_limit(limit: i64, default: u32, max: u32) -> u32 {
    if limit <= 0 {
        default.min(max)
    } else {
        u32::try_from(limit).unwrap_or(u32::MAX).min(max)
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into());
        self
    }

    pub fn with_apply(mut self, apply: impl Into<String>) -> Self {
        self.apply = Some(apply.into());
        self
    }

    /// Zero-based page index
    pub fn page_index(&self) -> u32 {
        u32::try_from((self.page - 1).max(0)).unwrap_or(u32::MAX)
    }

    /// Page size clamped to `[1, MAX_LIMIT]`
    pub fn effective_limit(&self) -> u32 {
        clamp_limit(self.limit, DEFAULT_LIMIT, MAX_LIMIT)
    }

    /// Row offset of the requested page
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index()) * u64::from(self.effective_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_has_zero_offset() {
        let params = QueryParams::new().with_page(1).with_limit(10);
        assert_eq!(params.offset(), 0);
        assert_eq!(params.effective_limit(), 10);
    }

    #[test]
    fn test_offset_is_page_index_times_limit() {
        let params = QueryParams::new().with_page(3).with_limit(25);
        assert_eq!(params.page_index(), 2);
        assert_eq!(params.offset(), 50);
    }

    #[test]
    fn test_page_zero_and_negative_is_first_page() {
        assert_eq!(QueryParams::new().with_page(0).offset(), 0);
        assert_eq!(QueryParams::new().with_page(-4).offset(), 0);
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(QueryParams::new().effective_limit(), DEFAULT_LIMIT);
        assert_eq!(QueryParams::new().with_limit(-1).effective_limit(), 50);
        assert_eq!(QueryParams::new().with_limit(5000).effective_limit(), 1000);
        assert_eq!(QueryParams::new().with_limit(1).effective_limit(), 1);
    }

    #[test]
    fn test_clamp_limit_custom_bounds() {
        assert_eq!(clamp_limit(0, 20, 100), 20);
        assert_eq!(clamp_limit(500, 20, 100), 100);
        assert_eq!(clamp_limit(0, 200, 100), 100);
    }
}
