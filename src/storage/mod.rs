//! Serial storage of encoded databases
//!
//! The storage layer only knows about loosely typed values. It never
//! validates against the schema; that is the mapper's job.

pub mod json;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use json::JsonStore;

/// A codec-level value.
///
/// Cells encode to `Null`, `Bool`, `Integer`, `Text` or `List`. The other
/// shapes exist so any JSON document loads at this layer: `Float` covers
/// numbers with a fraction or exponent, `Array` covers lists that are not
/// all strings, and `Map` is mostly seen in the schema table's `features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
    Array(Vec<Primitive>),
    Map(BTreeMap<String, Primitive>),
}

impl Primitive {
    pub fn is_null(&self) -> bool {
        matches!(self, Primitive::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integers, and floats with no fractional part that fit in an `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Primitive::Integer(n) => Some(*n),
            Primitive::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Primitive::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Primitive>> {
        match self {
            Primitive::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Short name of the value's shape, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Bool(_) => "boolean",
            Primitive::Integer(_) => "integer",
            Primitive::Float(_) => "float",
            Primitive::Text(_) => "string",
            Primitive::List(_) => "list",
            Primitive::Array(_) => "array",
            Primitive::Map(_) => "object",
        }
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::Text(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::Text(s)
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Primitive::Integer(n)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Bool(b)
    }
}

/// A row while the database is being serialized: column name -> value.
/// The primary column is absent; the enclosing key carries it.
pub type EncodedEntry = BTreeMap<String, Primitive>;

/// A table while the database is being serialized: primary key -> row
pub type EncodedTable = BTreeMap<String, EncodedEntry>;

/// A whole database while being serialized: table name -> table
pub type EncodedDatabase = BTreeMap<String, EncodedTable>;

/// A codec that can serialize an encoded database to a specific format
pub trait Store: Send + Sync {
    /// Deserialize a whole database
    fn read(&self, src: &mut dyn Read) -> Result<EncodedDatabase>;

    /// Serialize a whole database
    fn write(&self, dst: &mut dyn Write, db: &EncodedDatabase) -> Result<()>;

    /// Deserialize a single table shard
    fn read_shard(&self, src: &mut dyn Read) -> Result<EncodedTable>;

    /// Serialize a single table shard
    fn write_shard(&self, dst: &mut dyn Write, table: &EncodedTable) -> Result<()>;
}
