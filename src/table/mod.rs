//! Typed tables
//!
//! A table owns its rows keyed by primary key, in insertion order. Each row
//! holds one cell per column, in the schema's sorted column order, and the
//! primary cell always formats to the row's key.
//!
//! All mutators validate every input before touching the table, so a failed
//! call leaves the table exactly as it was.

pub mod filter;
pub mod query;

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::error::{JqlError, Result};
use crate::schema::{ColumnMeta, TableSchema};
use crate::types::Cell;

pub use filter::{Filter, Matcher};
pub use query::{QueryParams, QueryResult};

pub type Row = Vec<Cell>;

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<ColumnMeta>,
    column_index: HashMap<String, usize>,
    primary: usize,
    entries: IndexMap<String, Row>,
}

impl Table {
    /// Create an empty table; the schema must name a primary column
    pub fn new(name: &str, schema: &TableSchema) -> Result<Table> {
        let primary = schema
            .primary
            .ok_or_else(|| JqlError::Schema(format!("table {name} has no primary column")))?;
        let column_index = schema
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Ok(Table {
            name: name.to_string(),
            columns: schema.columns.clone(),
            column_index,
            primary,
            entries: IndexMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn index_of_field(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Like [`Table::index_of_field`], failing with `ColumnNotFound`
    pub fn field(&self, name: &str) -> Result<usize> {
        self.index_of_field(name).ok_or_else(|| JqlError::ColumnNotFound {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn primary(&self) -> usize {
        self.primary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_row(&self, pk: &str) -> Option<&Row> {
        self.entries.get(pk)
    }

    pub fn row(&self, pk: &str) -> Result<&Row> {
        self.get_row(pk).ok_or_else(|| self.row_not_found(pk))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Row)> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Add a row with every cell at its null form and the primary set to `pk`
    pub fn insert(&mut self, pk: &str) -> Result<()> {
        if self.entries.contains_key(pk) {
            return Err(JqlError::DuplicateKey {
                table: self.name.clone(),
                pk: pk.to_string(),
            });
        }
        let row = self.new_row(pk)?;
        self.entries.insert(pk.to_string(), row);
        Ok(())
    }

    /// Upsert: create the row if missing, then overwrite the given fields.
    ///
    /// Values are user-entered strings, decoded with each column's reverse.
    pub fn insert_with_fields(&mut self, pk: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut staged = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let i = self.field(name)?;
            let cell = self.reverse(i, value)?;
            if i == self.primary && cell.format("") != pk {
                return Err(JqlError::invalid_value(
                    &self.qualified(i),
                    format!("primary value '{value}' does not match pk '{pk}'"),
                ));
            }
            staged.push((i, cell));
        }

        let mut row = match self.entries.get(pk) {
            Some(existing) => existing.clone(),
            None => self.new_row(pk)?,
        };
        for (i, cell) in staged {
            row[i] = cell;
        }
        self.entries.insert(pk.to_string(), row);
        Ok(())
    }

    /// Replace one cell from its user-entered string form
    pub fn update(&mut self, pk: &str, field: &str, value: &str) -> Result<()> {
        if !self.entries.contains_key(pk) {
            return Err(self.row_not_found(pk));
        }
        let i = self.field(field)?;
        let cell = self.reverse(i, value)?;
        self.set_cell(pk, i, cell)
    }

    /// Replace one cell. Changing the primary cell re-keys the row in place.
    pub fn set_cell(&mut self, pk: &str, column: usize, cell: Cell) -> Result<()> {
        if column >= self.columns.len() {
            return Err(JqlError::ColumnNotFound {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }
        if !self.entries.contains_key(pk) {
            return Err(self.row_not_found(pk));
        }

        if column == self.primary {
            let new_pk = cell.format("");
            if new_pk != pk {
                if self.entries.contains_key(&new_pk) {
                    return Err(JqlError::DuplicateKey {
                        table: self.name.clone(),
                        pk: new_pk,
                    });
                }
                let (index, _, mut row) = self
                    .entries
                    .shift_remove_full(pk)
                    .ok_or_else(|| self.row_not_found(pk))?;
                row[column] = cell;
                self.entries.shift_insert(index, new_pk, row);
                return Ok(());
            }
        }

        let row = self
            .entries
            .get_mut(pk)
            .ok_or_else(|| JqlError::RowNotFound {
                table: self.name.clone(),
                pk: pk.to_string(),
            })?;
        row[column] = cell;
        Ok(())
    }

    pub fn delete(&mut self, pk: &str) -> Result<Row> {
        self.entries
            .shift_remove(pk)
            .ok_or_else(|| self.row_not_found(pk))
    }

    /// Filter, order and page the rows
    pub fn query(&self, params: &QueryParams) -> QueryResult<'_> {
        let mut rows: Vec<(&str, &Row)> = self
            .entries()
            .filter(|(_, row)| params.filters.iter().all(|f| f.applies(row)))
            .collect();

        if let Some(col) = params.order_by {
            rows.sort_by(|(_, a), (_, b)| {
                let ord = match (a.get(col), b.get(col)) {
                    (Some(x), Some(y)) => x.ordering(y),
                    _ => std::cmp::Ordering::Equal,
                };
                if params.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let total = rows.len();
        let limit = if params.limit == 0 { usize::MAX } else { params.limit };
        let rows = rows.into_iter().skip(params.offset).take(limit).collect();
        QueryResult { rows, total }
    }

    /// Attach a decoded row during load; the caller guarantees shape and key
    pub(crate) fn push_row(&mut self, pk: String, row: Row) {
        self.entries.insert(pk, row);
    }

    fn new_row(&self, pk: &str) -> Result<Row> {
        let primary_cell = self.reverse(self.primary, pk)?;
        if primary_cell.format("") != pk {
            return Err(JqlError::invalid_value(
                &self.qualified(self.primary),
                format!("'{pk}' is not in canonical form"),
            ));
        }
        let mut row: Row = self.columns.iter().map(|c| c.kind.null_cell()).collect();
        row[self.primary] = primary_cell;
        Ok(row)
    }

    fn reverse(&self, column: usize, value: &str) -> Result<Cell> {
        self.columns[column]
            .kind
            .reverse("", value)
            .map_err(|reason| JqlError::invalid_value(&self.qualified(column), reason))
    }

    fn qualified(&self, column: usize) -> String {
        format!("{}.{}", self.name, self.columns[column].name)
    }

    fn row_not_found(&self, pk: &str) -> JqlError {
        JqlError::RowNotFound {
            table: self.name.clone(),
            pk: pk.to_string(),
        }
    }
}
