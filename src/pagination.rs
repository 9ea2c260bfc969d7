//! Fixed-size paging of ordered result lists.
//!
//! Page selection is forgiving: a missing or malformed page number shows
//! the first page, and a number outside `1..=num_pages` shows the last one.
//! An empty list still has one (empty) page.

use serde::Deserialize;

/// Number of posts shown on every list page.
pub const PAGE_SIZE: i64 = 10;

/// `?page=N` query string shared by all list pages.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    count: i64,
    per_page: i64,
}

impl Paginator {
    pub fn new(count: i64, per_page: i64) -> Self {
        Self {
            count: count.max(0),
            per_page: per_page.max(1),
        }
    }

    pub fn num_pages(&self) -> i64 {
        if self.count == 0 {
            1
        } else {
            (self.count + self.per_page - 1) / self.per_page
        }
    }

    /// Resolve a raw `page` parameter to a valid page number.
    pub fn page_number(&self, raw: Option<&str>) -> i64 {
        match raw.map(str::trim).map(str::parse::<i64>) {
            Some(Ok(n)) if (1..=self.num_pages()).contains(&n) => n,
            Some(Ok(_)) => self.num_pages(),
            _ => 1,
        }
    }

    /// `(limit, offset)` for the given page number.
    pub fn window(&self, number: i64) -> (i64, i64) {
        (self.per_page, (number - 1) * self.per_page)
    }
}

/// One numbered link in the page navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLink {
    pub number: i64,
    pub current: bool,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_other_pages(&self) -> bool {
        self.has_next() || self.has_previous()
    }

    pub fn next_page_number(&self) -> i64 {
        self.number + 1
    }

    pub fn previous_page_number(&self) -> i64 {
        self.number - 1
    }

    pub fn page_range(&self) -> Vec<PageLink> {
        (1..=self.num_pages)
            .map(|number| PageLink {
                number,
                current: number == self.number,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
