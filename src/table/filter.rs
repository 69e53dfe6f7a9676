//! Row predicates
//!
//! Filters compare against the canonical `format("")` rendering of a cell,
//! except exact containment which looks for `"\n<value>\n"` in the list
//! rendering. Filters in a query are ANDed.

use std::collections::HashSet;

use crate::types::{Cell, LIST_FORMAT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Equal(String),
    In(HashSet<String>),
    Contains { value: String, exact: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// `None` matches against every column of the row
    pub column: Option<usize>,
    pub negated: bool,
    pub matcher: Matcher,
}

impl Filter {
    pub fn new(column: Option<usize>, matcher: Matcher) -> Self {
        Filter { column, negated: false, matcher }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn applies(&self, row: &[Cell]) -> bool {
        let matched = match self.column {
            Some(i) => row.get(i).is_some_and(|cell| self.matcher.matches(cell)),
            None => row.iter().any(|cell| self.matcher.matches(cell)),
        };
        matched != self.negated
    }
}

impl Matcher {
    fn matches(&self, cell: &Cell) -> bool {
        match self {
            Matcher::Equal(value) => cell.format("") == *value,
            Matcher::In(values) => values.contains(&cell.format("")),
            Matcher::Contains { value, exact: true } => {
                cell.format(LIST_FORMAT).contains(&format!("\n{value}\n"))
            }
            Matcher::Contains { value, exact: false } => cell
                .format("")
                .to_lowercase()
                .contains(&value.to_lowercase()),
        }
    }
}
