//! A named collection of typed tables plus the schema that describes them

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{JqlError, Result};
use crate::osm::ObjectStoreMapper;
use crate::storage::EncodedTable;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Database {
    schemata: EncodedTable,
    tables: BTreeMap<String, Table>,
}

impl Database {
    pub(crate) fn from_parts(schemata: EncodedTable, tables: BTreeMap<String, Table>) -> Self {
        Database { schemata, tables }
    }

    /// The raw `_schemata` table, kept so it can be written back unchanged
    pub fn schemata(&self) -> &EncodedTable {
        &self.schemata
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Exact lookup
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Resolve `name` exactly, else as a prefix of the first table sorting after it
    pub fn find_table(&self, name: &str) -> Result<&Table> {
        let key = self.resolve(name)?;
        self.tables
            .get(&key)
            .ok_or_else(|| JqlError::TableNotFound(name.to_string()))
    }

    pub fn find_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        let key = self.resolve(name)?;
        self.tables
            .get_mut(&key)
            .ok_or_else(|| JqlError::TableNotFound(name.to_string()))
    }

    /// Encode the whole database, schema included, with the default codec
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        ObjectStoreMapper::default().store_bytes(self)
    }

    fn resolve(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(JqlError::TableNotFound(name.to_string()));
        }
        // An exact match sorts first among the names it prefixes
        self.tables
            .range::<str, _>((Bound::Included(name), Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(name))
            .map(|(key, _)| key.clone())
            .ok_or_else(|| JqlError::TableNotFound(name.to_string()))
    }
}
