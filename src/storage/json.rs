//! Indented JSON codec
//!
//! Keys come out sorted (the encoded maps are `BTreeMap`s) and nested
//! objects are indented by four spaces so the file diffs cleanly.

use std::io::{Read, Write};

use serde::Serialize;

use super::{EncodedDatabase, EncodedTable, Store};
use crate::error::Result;

const INDENT: &[u8] = b"    ";

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStore;

impl JsonStore {
    pub fn new() -> Self {
        JsonStore
    }

    fn write_value<T: Serialize>(dst: &mut dyn Write, value: &T) -> Result<()> {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
        let mut ser = serde_json::Serializer::with_formatter(&mut *dst, formatter);
        value.serialize(&mut ser)?;
        dst.flush()?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn read(&self, src: &mut dyn Read) -> Result<EncodedDatabase> {
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    fn write(&self, dst: &mut dyn Write, db: &EncodedDatabase) -> Result<()> {
        Self::write_value(dst, db)
    }

    fn read_shard(&self, src: &mut dyn Read) -> Result<EncodedTable> {
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    fn write_shard(&self, dst: &mut dyn Write, table: &EncodedTable) -> Result<()> {
        Self::write_value(dst, table)
    }
}
