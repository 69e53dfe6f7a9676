//! Schema table parsing
//!
//! Every database carries a `_schemata` table whose keys are
//! `<table>.<column>` and whose rows describe the column:
//!
//! ```json
//! "tasks.status": { "type": "enum", "features": { "values": "todo, done" } },
//! "tasks.id":     { "type": "string", "primary": true }
//! ```
//!
//! Columns come out sorted by name so two loads of the same file always
//! produce the same column order.
//!
//! One column per table may also carry `primary_shards` (and optionally
//! `secondary_shards`), which spreads the table's rows over several files
//! in the directory layout, keyed by that column's value.

use std::collections::BTreeMap;

use crate::error::{JqlError, Result};
use crate::storage::{EncodedEntry, EncodedTable, Primitive};
use crate::types::column::{Features, TypeTag};
use crate::types::ColumnKind;

/// Name of the table holding column metadata
pub const SCHEMA_TABLE: &str = "_schemata";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    pub primary: bool,
    pub features: Features,
}

/// File layout of a sharded table inside a `.jql` directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardLayout {
    /// `primary_shards: 256`: `<table>/<hash>.json`
    Hashed,
    /// `primary_shards: 256, secondary_shards: -1`: `<table>/<hash>/<key>.json`
    HashedByKey,
}

impl ShardLayout {
    fn from_counts(primary: i64, secondary: i64) -> Option<ShardLayout> {
        match (primary, secondary) {
            (256, 0) => Some(ShardLayout::Hashed),
            (256, -1) => Some(ShardLayout::HashedByKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sharding {
    /// Column whose formatted value picks the shard
    pub column: String,
    pub layout: ShardLayout,
}

/// Parsed column metadata for one table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    /// Sorted ascending by name
    pub columns: Vec<ColumnMeta>,
    pub primary: Option<usize>,
    /// Declared `dynamic.*` columns, which are not materialized
    pub dynamic: Vec<String>,
    pub sharding: Option<Sharding>,
}

impl TableSchema {
    pub fn is_dynamic(&self, column: &str) -> bool {
        self.dynamic.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn parse(raw: &EncodedTable) -> Result<Schema> {
        let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();

        for (key, fields) in raw {
            let (table, column) = split_column_name(key)?;
            let schema = tables.entry(table.to_string()).or_default();

            let tag = column_type(key, fields)?;
            if tag.is_dynamic() {
                schema.dynamic.push(column.to_string());
                continue;
            }

            let primary = match fields.get("primary") {
                None | Some(Primitive::Null) => false,
                Some(p) => p.as_bool().ok_or_else(|| {
                    JqlError::Schema(format!("{key}: primary must be a boolean, found {}", p.kind()))
                })?,
            };

            let mut features = match fields.get("features") {
                None | Some(Primitive::Null) => Features::new(),
                Some(Primitive::Map(m)) => m.clone(),
                Some(other) => {
                    return Err(JqlError::Schema(format!(
                        "{key}: features must be an object, found {}",
                        other.kind()
                    )))
                }
            };

            let kind = ColumnKind::from_tag(&tag, &mut features)
                .map_err(|e| JqlError::Schema(format!("{key}: {e}")))?;

            let primary_shards = shard_count(key, fields, "primary_shards")?;
            let secondary_shards = shard_count(key, fields, "secondary_shards")?;
            if primary_shards != 0 || secondary_shards != 0 {
                let layout = ShardLayout::from_counts(primary_shards, secondary_shards).ok_or_else(|| {
                    JqlError::Schema(format!(
                        "{key}: unknown sharding strategy with {primary_shards} primary shards \
                         and {secondary_shards} secondary shards"
                    ))
                })?;
                if let Some(prev) = &schema.sharding {
                    return Err(JqlError::Schema(format!(
                        "table {table} is sharded by both {} and {column}",
                        prev.column
                    )));
                }
                schema.sharding = Some(Sharding {
                    column: column.to_string(),
                    layout,
                });
            }

            schema.columns.push(ColumnMeta {
                name: column.to_string(),
                kind,
                primary,
                features,
            });
        }

        for (name, schema) in tables.iter_mut() {
            schema.columns.sort_by(|a, b| a.name.cmp(&b.name));
            for (i, col) in schema.columns.iter().enumerate() {
                if !col.primary {
                    continue;
                }
                if let Some(prev) = schema.primary {
                    return Err(JqlError::Schema(format!(
                        "table {name} has multiple primaries: {} and {}",
                        schema.columns[prev].name, col.name
                    )));
                }
                schema.primary = Some(i);
            }
        }

        Ok(Schema { tables })
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn split_column_name(key: &str) -> Result<(&str, &str)> {
    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(table), Some(column), None) if !table.is_empty() && !column.is_empty() => {
            Ok((table, column))
        }
        _ => Err(JqlError::Schema(format!("invalid column name {key}"))),
    }
}

fn shard_count(key: &str, fields: &EncodedEntry, name: &str) -> Result<i64> {
    match fields.get(name) {
        None | Some(Primitive::Null) => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| JqlError::Schema(format!("{key}: invalid type for {name}: {}", v.kind()))),
    }
}

fn column_type(key: &str, fields: &EncodedEntry) -> Result<TypeTag> {
    let ty = fields
        .get("type")
        .ok_or_else(|| JqlError::Schema(format!("{key}: missing type")))?;
    let ty = ty
        .as_str()
        .ok_or_else(|| JqlError::Schema(format!("{key}: type must be a string, found {}", ty.kind())))?;
    Ok(TypeTag::parse(ty))
}
