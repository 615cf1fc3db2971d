//! Pagination envelope.

use serde::{Deserialize, Serialize};

/// Hard ceiling on page size; larger requests are clamped.
pub const MAX_PER_PAGE: u64 = 100;

/// Clamp a requested page size to [`MAX_PER_PAGE`], warning when it
/// was out of range. Zero becomes one.
pub(crate) fn cap_per_page(per_page: u64) -> u64 {
    if per_page == 0 {
        tracing::warn!("per_page of 0 raised to 1");
        return 1;
    }
    if per_page > MAX_PER_PAGE {
        tracing::warn!(requested = per_page, max = MAX_PER_PAGE, "per_page clamped");
        return MAX_PER_PAGE;
    }
    per_page
}

/// Offset of a 1-based page, saturating instead of wrapping on
/// pathological page numbers.
pub(crate) fn page_offset(page: u64, per_page: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(per_page)
}

/// One page of results plus the numbers a paginated UI needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matching rows across all pages.
    pub total: u64,
    /// Current page, 1-based.
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    #[must_use]
    pub fn empty(page: u64, per_page: u64) -> Self {
        Self::new(Vec::new(), 0, page, per_page)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        let page: Page<u32> = Page::new(vec![1, 2, 3], 25, 2, 10);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
    }

    #[test]
    fn first_and_last_page_flags() {
        let first: Page<u32> = Page::new(vec![], 25, 1, 10);
        assert!(first.has_next);
        assert!(!first.has_prev);

        let last: Page<u32> = Page::new(vec![], 25, 3, 10);
        assert!(!last.has_next);
        assert!(last.has_prev);
    }

    #[test]
    fn exact_division() {
        let page: Page<u32> = Page::new(vec![], 30, 3, 10);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next);
    }

    #[test]
    fn empty_page() {
        let page: Page<u32> = Page::empty(1, 10);
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next);
        assert!(!page.has_prev);
    }

    #[test]
    fn page_offset_saturates() {
        assert_eq!(page_offset(1, 10), 0);
        assert_eq!(page_offset(3, 10), 20);
        assert_eq!(page_offset(u64::MAX, 100), u64::MAX);
    }

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(cap_per_page(0), 1);
        assert_eq!(cap_per_page(50), 50);
        assert_eq!(cap_per_page(1_000), MAX_PER_PAGE);
    }
}
