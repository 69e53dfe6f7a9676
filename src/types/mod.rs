//! Typed cell values
//!
//! A [`Cell`] is one column value in one row. The set of variants is closed;
//! every variant knows how to format, compare, increment and encode itself.
//! Construction from encoded or user-entered values lives on
//! [`ColumnKind`], which carries the per-column features a variant needs.

pub mod column;
pub mod id;
pub mod money;
pub mod time;

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{JqlError, Result};
use crate::storage::Primitive;

pub use column::ColumnKind;

/// Format hint that asks a cell for its newline-delimited list form.
///
/// A scalar cell renders as `"\n<value>\n"` and a foreign list renders each
/// key on its own line, so an exact-contains filter can look for
/// `"\n<key>\n"` regardless of the column's variant.
pub const LIST_FORMAT: &str = "<list>";

/// Variant tag exposed to service callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    String,
    Int,
    Date,
    Enum,
    Id,
    Time,
    MoneyAmount,
    Foreign,
    Foreigns,
}

/// One of a fixed, ordered list of values. Held as an index, encoded as the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    values: Arc<[String]>,
    index: usize,
}

impl EnumValue {
    pub(crate) fn new(values: Arc<[String]>, index: usize) -> Self {
        Self { values, index }
    }

    pub fn value(&self) -> &str {
        self.values.get(self.index).map(String::as_str).unwrap_or("")
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// A primary key of a row in another table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: Arc<str>,
    pub key: String,
}

/// An ordered multiset of primary keys of rows in another table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignList {
    pub table: Arc<str>,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    String(String),
    Integer(i64),
    Id(String),
    /// Days since 1970-01-01 UTC
    Date(i64),
    /// Seconds since 1970-01-01T00:00:00 UTC
    Time(i64),
    /// Signed cents
    MoneyAmount(i64),
    Enum(EnumValue),
    ForeignKey(ForeignKey),
    ForeignList(ForeignList),
}

impl Cell {
    pub fn entry_type(&self) -> EntryType {
        match self {
            Cell::String(_) => EntryType::String,
            Cell::Integer(_) => EntryType::Int,
            Cell::Id(_) => EntryType::Id,
            Cell::Date(_) => EntryType::Date,
            Cell::Time(_) => EntryType::Time,
            Cell::MoneyAmount(_) => EntryType::MoneyAmount,
            Cell::Enum(_) => EntryType::Enum,
            Cell::ForeignKey(_) => EntryType::Foreign,
            Cell::ForeignList(_) => EntryType::Foreigns,
        }
    }

    /// Render the cell.
    ///
    /// An empty hint gives the canonical form that filters and equality
    /// compare against. [`LIST_FORMAT`] gives the list form. Dates and
    /// times treat any other hint as a strftime pattern.
    pub fn format(&self, hint: &str) -> String {
        if hint == LIST_FORMAT {
            return match self {
                Cell::ForeignList(list) => {
                    let mut out = String::from("\n");
                    for key in &list.keys {
                        out.push_str(key);
                        out.push('\n');
                    }
                    out
                }
                other => format!("\n{}\n", other.format("")),
            };
        }
        match self {
            Cell::String(s) | Cell::Id(s) => s.clone(),
            Cell::Integer(n) => n.to_string(),
            Cell::Date(days) => time::format_date(*days, hint),
            Cell::Time(secs) => time::format_time(*secs, hint),
            Cell::MoneyAmount(cents) => money::format_cents(*cents),
            Cell::Enum(e) => e.value().to_string(),
            Cell::ForeignKey(fk) => fk.key.clone(),
            Cell::ForeignList(list) => format!("{} refs", list.keys.len()),
        }
    }

    /// Strict less-than: true iff `other` sorts after `self`.
    ///
    /// Cells of different variants never compare as less.
    pub fn less_than(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::String(a), Cell::String(b)) | (Cell::Id(a), Cell::Id(b)) => a < b,
            (Cell::Integer(a), Cell::Integer(b))
            | (Cell::Date(a), Cell::Date(b))
            | (Cell::Time(a), Cell::Time(b))
            | (Cell::MoneyAmount(a), Cell::MoneyAmount(b)) => a < b,
            (Cell::Enum(a), Cell::Enum(b)) => a.index < b.index,
            (Cell::ForeignKey(a), Cell::ForeignKey(b)) => a.key < b.key,
            (Cell::ForeignList(a), Cell::ForeignList(b)) => a.keys.len() < b.keys.len(),
            _ => false,
        }
    }

    /// Total ordering derived from [`Cell::less_than`], for stable sorts
    pub fn ordering(&self, other: &Cell) -> Ordering {
        if self.less_than(other) {
            Ordering::Less
        } else if other.less_than(self) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Variant-specific increment
    pub fn add(&self, delta: &Primitive) -> Result<Cell> {
        let refuse = || {
            JqlError::NotIncrementable(format!(
                "{:?} by a {} value",
                self.entry_type(),
                delta.kind()
            ))
        };
        match self {
            Cell::String(s) => match delta {
                Primitive::Text(suffix) => Ok(Cell::String(format!("{s}{suffix}"))),
                _ => Err(refuse()),
            },
            Cell::Integer(n) => {
                let d = delta.as_i64().ok_or_else(refuse)?;
                n.checked_add(d).map(Cell::Integer).ok_or_else(refuse)
            }
            Cell::Date(days) => {
                let d = delta.as_i64().ok_or_else(refuse)?;
                days.checked_add(d).map(Cell::Date).ok_or_else(refuse)
            }
            Cell::Time(secs) => {
                let d = delta.as_i64().ok_or_else(refuse)?;
                d.checked_mul(time::SECONDS_PER_DAY)
                    .and_then(|s| secs.checked_add(s))
                    .map(Cell::Time)
                    .ok_or_else(refuse)
            }
            Cell::MoneyAmount(cents) => {
                let d = delta.as_i64().ok_or_else(refuse)?;
                cents.checked_add(d).map(Cell::MoneyAmount).ok_or_else(refuse)
            }
            Cell::Enum(e) => {
                let d = delta.as_i64().ok_or_else(refuse)?;
                let n = e.values.len() as i64;
                if n == 0 {
                    return Err(refuse());
                }
                let index = (e.index as i64 + d.rem_euclid(n)).rem_euclid(n) as usize;
                Ok(Cell::Enum(EnumValue::new(Arc::clone(&e.values), index)))
            }
            Cell::Id(_) | Cell::ForeignKey(_) | Cell::ForeignList(_) => Err(refuse()),
        }
    }

    /// The value handed to the codec
    pub fn encode(&self) -> Primitive {
        match self {
            Cell::String(s) | Cell::Id(s) => Primitive::Text(s.clone()),
            Cell::Integer(n) | Cell::Date(n) | Cell::Time(n) | Cell::MoneyAmount(n) => {
                Primitive::Integer(*n)
            }
            Cell::Enum(e) => Primitive::Text(e.value().to_string()),
            Cell::ForeignKey(fk) => Primitive::Text(fk.key.clone()),
            Cell::ForeignList(list) => Primitive::List(list.keys.clone()),
        }
    }
}
