//! Page cursor with boundary deduplication
//!
//! Pages are requested with an inclusive lower bound. The next page therefore
//! starts at the timestamp of the last row already written and repeats every
//! row sharing that timestamp; `skip_count` says how many of them to drop.

use chrono::{DateTime, Utc};

use crate::models::Sample;

/// Position of a task within its time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    next_start: DateTime<Utc>,
    skip_count: usize,
    page_size: usize,
}

impl PageCursor {
    /// Cursor at `start` with nothing to skip
    pub fn new(start: DateTime<Utc>, page_size: usize) -> Self {
        Self {
            next_start: start,
            skip_count: 0,
            page_size: page_size.max(1),
        }
    }

    /// Inclusive lower bound of the next page
    pub fn next_start(&self) -> DateTime<Utc> {
        self.next_start
    }

    /// Leading rows of the next page that were already written
    pub fn skip_count(&self) -> usize {
        self.skip_count
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Row count to ask for in a recorded request
    ///
    /// Normally the page size. When a whole page shares one timestamp the
    /// skipped rows alone would fill it, so the request is widened past them.
    pub fn request_size(&self) -> usize {
        if self.skip_count >= self.page_size {
            self.skip_count + self.page_size
        } else {
            self.page_size
        }
    }

    /// Rows of `page` not yet written
    pub fn fresh<'a>(&self, page: &'a [Sample]) -> &'a [Sample] {
        page.get(self.skip_count..).unwrap_or(&[])
    }

    /// Move past `page`, keeping its trailing equal-timestamp rows as the
    /// skip count for the next request
    ///
    /// An empty page leaves the cursor unchanged.
    pub fn advance(&mut self, page: &[Sample]) {
        let Some(last) = page.last() else {
            return;
        };
        if last.timestamp < self.next_start {
            return;
        }
        self.skip_count = trailing_duplicates(page);
        self.next_start = last.timestamp;
    }

    /// Jump to `start` with nothing to skip; never moves backwards
    pub fn jump_to(&mut self, start: DateTime<Utc>) {
        if start > self.next_start {
            self.next_start = start;
            self.skip_count = 0;
        }
    }
}

/// Number of trailing rows sharing the last row's timestamp
pub fn trailing_duplicates(page: &[Sample]) -> usize {
    match page.last() {
        Some(last) => page
            .iter()
            .rev()
            .take_while(|s| s.timestamp == last.timestamp)
            .count(),
        None => 0,
    }
}
