//! Query parameters and results

use super::filter::Filter;
use super::Row;

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub filters: Vec<Filter>,
    /// Column index to sort by; `None` keeps insertion order
    pub order_by: Option<usize>,
    pub descending: bool,
    pub offset: usize,
    /// 0 means unlimited
    pub limit: usize,
}

impl QueryParams {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: usize, descending: bool) -> Self {
        self.order_by = Some(column);
        self.descending = descending;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

#[derive(Debug)]
pub struct QueryResult<'a> {
    /// Matched `(pk, row)` pairs after ordering and paging
    pub rows: Vec<(&'a str, &'a Row)>,
    /// Number of matches before offset and limit
    pub total: usize,
}
