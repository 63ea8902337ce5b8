use std::ops::Range;

/// One resolved page over a sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageWindow {
    /// Clamped zero-based page index.
    pub page_index: usize,
    /// Total number of pages (at least 1).
    pub total_pages: usize,
    /// Sample indices covered by this page.
    pub range: Range<usize>,
}

impl PageWindow {
    /// Whether a "previous" navigation would move.
    pub fn can_go_previous(&self) -> bool {
        self.page_index > 0
    }

    /// Whether a "next" navigation would move.
    pub fn can_go_next(&self) -> bool {
        self.page_index + 1 < self.total_pages
    }

    /// Whether this is the final page.
    pub fn is_last(&self) -> bool {
        !self.can_go_next()
    }

    /// Number of items on the page.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// True for the single empty page of an empty sample.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// `ceil(len / page_size)`, minimum 1. A zero page size is treated as 1.
pub fn total_pages(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size.max(1)).max(1)
}

/// Resolve `page_index` (clamped) into a window over a sample of `len` items.
pub fn window(len: usize, page_size: usize, page_index: usize) -> PageWindow {
    let page_size = page_size.max(1);
    let total_pages = total_pages(len, page_size);
    let page_index = page_index.min(total_pages - 1);
    let start = (page_index * page_size).min(len);
    let end = (start + page_size).min(len);
    PageWindow {
        page_index,
        total_pages,
        range: start..end,
    }
}

/// Slice `items` to the requested page; returns the items with the resolved window.
pub fn page<T>(items: &[T], page_size: usize, page_index: usize) -> (&[T], PageWindow) {
    let window = window(items.len(), page_size, page_index);
    (&items[window.range.clone()], window)
}
