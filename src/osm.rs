//! Object/store mapper
//!
//! Converts between the loosely typed [`EncodedDatabase`] a codec produces
//! and a typed [`Database`]. Loading consults the `_schemata` table to build
//! every table's columns and decodes each stored value through its column
//! kind. Storing walks the tables, encodes every cell except the primary
//! (the row key carries it) and re-emits `_schemata` unchanged.
//!
//! A database on disk is either one file (`*.json`) or a directory of
//! per-table shards (`*.jql/<table>.json`). Tables whose schema names a
//! shard column are split further into `<table>/<hash>.json` or
//! `<table>/<hash>/<key>.json`; every `*.json` file below the directory
//! belongs to the table named by its first path component.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::Database;
use crate::error::{JqlError, Result};
use crate::schema::{Schema, ShardLayout, Sharding, SCHEMA_TABLE};
use crate::storage::{EncodedDatabase, EncodedEntry, EncodedTable, JsonStore, Primitive, Store};
use crate::table::{Row, Table};

const SHARD_EXTENSION: &str = "json";

/// How a database is laid out at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// A single `*.json` file
    File,
    /// A `*.jql` directory holding per-table shard files
    Directory,
}

impl Layout {
    pub fn of(path: &Path) -> Result<Layout> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Layout::File),
            Some("jql") => Ok(Layout::Directory),
            _ => Err(JqlError::Config(format!(
                "unknown database format for {}: expected a .json file or a .jql directory",
                path.display()
            ))),
        }
    }
}

#[derive(Clone)]
pub struct ObjectStoreMapper {
    store: Arc<dyn Store>,
}

impl Default for ObjectStoreMapper {
    fn default() -> Self {
        Self::new(Arc::new(JsonStore::new()))
    }
}

impl ObjectStoreMapper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ObjectStoreMapper { store }
    }

    pub fn load(&self, src: &mut dyn Read) -> Result<Database> {
        let encoded = self.store.read(src)?;
        self.decode(encoded)
    }

    pub fn load_bytes(&self, mut bytes: &[u8]) -> Result<Database> {
        self.load(&mut bytes)
    }

    pub fn load_path(&self, path: &Path) -> Result<Database> {
        let encoded = match Layout::of(path)? {
            Layout::File => {
                let mut reader = BufReader::new(fs::File::open(path)?);
                self.store.read(&mut reader)?
            }
            Layout::Directory => self.read_shards(path)?,
        };
        let db = self.decode(encoded)?;
        tracing::info!(path = %path.display(), tables = db.len(), "loaded database");
        Ok(db)
    }

    pub fn store(&self, db: &Database, dst: &mut dyn Write) -> Result<()> {
        self.store.write(dst, &self.encode(db))
    }

    pub fn store_bytes(&self, db: &Database) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.store(db, &mut buf)?;
        Ok(buf)
    }

    /// Write through a sibling temporary file renamed over `path`
    pub fn store_path(&self, db: &Database, path: &Path) -> Result<()> {
        match Layout::of(path)? {
            Layout::File => {
                let encoded = self.encode(db);
                write_atomic(path, |w| self.store.write(w, &encoded))?
            }
            Layout::Directory => self.write_shards(path, db)?,
        }
        tracing::info!(path = %path.display(), tables = db.len(), "persisted database");
        Ok(())
    }

    /// Build a typed database from its encoded form
    pub fn decode(&self, mut encoded: EncodedDatabase) -> Result<Database> {
        let schemata = encoded.remove(SCHEMA_TABLE).unwrap_or_default();
        let schema = Schema::parse(&schemata)?;

        let mut tables = BTreeMap::new();
        for (name, table_schema) in schema.tables() {
            if table_schema.primary.is_some() {
                tables.insert(name.to_string(), Table::new(name, table_schema)?);
            }
        }

        for (name, rows) in encoded {
            let table_schema = schema
                .table(&name)
                .ok_or_else(|| JqlError::Schema(format!("table {name} is not described in {SCHEMA_TABLE}")))?;
            if rows.is_empty() {
                continue;
            }
            let table = tables
                .get_mut(&name)
                .ok_or_else(|| JqlError::Schema(format!("table {name} has no primary column")))?;
            let mut ignored = BTreeSet::new();
            for (pk, fields) in rows {
                ignored.extend(
                    fields
                        .keys()
                        .filter(|f| table.index_of_field(f).is_none() && !table_schema.is_dynamic(f))
                        .cloned(),
                );
                let row = decode_row(table, &pk, &fields)?;
                table.push_row(pk, row);
            }
            for column in ignored {
                tracing::warn!(table = %name, column = %column, "ignoring stored values for a column not in the schema");
            }
        }

        Ok(Database::from_parts(schemata, tables))
    }

    /// Flatten a typed database into its encoded form
    pub fn encode(&self, db: &Database) -> EncodedDatabase {
        let mut out = EncodedDatabase::new();
        out.insert(SCHEMA_TABLE.to_string(), db.schemata().clone());
        for table in db.tables() {
            let columns = table.columns();
            let primary = table.primary();
            let encoded: EncodedTable = table
                .entries()
                .map(|(pk, row)| {
                    let entry: EncodedEntry = row
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != primary)
                        .map(|(i, cell)| (columns[i].name.clone(), cell.encode()))
                        .collect();
                    (pk.to_string(), entry)
                })
                .collect();
            out.insert(table.name().to_string(), encoded);
        }
        out
    }

    fn read_shards(&self, dir: &Path) -> Result<EncodedDatabase> {
        let mut encoded = EncodedDatabase::new();
        for path in shard_files(dir)? {
            let Some(name) = shard_table(dir, &path) else {
                continue;
            };
            let mut reader = BufReader::new(fs::File::open(&path)?);
            let shard = self.store.read_shard(&mut reader)?;
            encoded.entry(name).or_default().extend(shard);
        }
        Ok(encoded)
    }

    fn write_shards(&self, dir: &Path, db: &Database) -> Result<()> {
        let schema = Schema::parse(db.schemata())?;
        let encoded = self.encode(db);
        fs::create_dir_all(dir)?;

        let mut written = BTreeSet::new();
        for (name, rows) in &encoded {
            let sharding = schema.table(name).and_then(|t| t.sharding.as_ref());
            match (sharding, db.table(name)) {
                (Some(sharding), Some(table)) => {
                    for (path, shard) in split_table(dir, table, sharding, rows)? {
                        self.write_shard_file(&path, &shard)?;
                        written.insert(path);
                    }
                }
                _ => {
                    let path = dir.join(format!("{name}.{SHARD_EXTENSION}"));
                    self.write_shard_file(&path, rows)?;
                    written.insert(path);
                }
            }
        }

        // Dropped tables and rows that moved shard leave files behind
        for path in shard_files(dir)? {
            if !written.contains(&path) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn write_shard_file(&self, path: &Path, table: &EncodedTable) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, |w| self.store.write_shard(w, table))
    }
}

/// Group a sharded table's encoded rows by the file each belongs in
fn split_table(
    dir: &Path,
    table: &Table,
    sharding: &Sharding,
    rows: &EncodedTable,
) -> Result<BTreeMap<PathBuf, EncodedTable>> {
    let column = table.field(&sharding.column)?;
    let base = dir.join(table.name());
    let mut shards: BTreeMap<PathBuf, EncodedTable> = BTreeMap::new();
    for (pk, row) in table.entries() {
        let Some(entry) = rows.get(pk) else {
            continue;
        };
        let key = row[column].format("").replace('/', "_");
        let hash = shard_hash(&key);
        let path = match sharding.layout {
            ShardLayout::Hashed => base.join(format!("{hash}.{SHARD_EXTENSION}")),
            ShardLayout::HashedByKey => base.join(&hash).join(format!("{key}.{SHARD_EXTENSION}")),
        };
        shards.entry(path).or_default().insert(pk.to_string(), entry.clone());
    }
    Ok(shards)
}

/// FNV-1a (32-bit) of `key` folded to one byte by xor, as two hex digits
fn shard_hash(key: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for b in key.bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let folded = hash.to_le_bytes().iter().fold(0u8, |acc, b| acc ^ b);
    format!("{folded:02x}")
}

/// Every `*.json` file below `dir`, sorted
fn shard_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(SHARD_EXTENSION) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// The table a shard file belongs to: its first component under `dir`, up to the first dot
fn shard_table(dir: &Path, path: &Path) -> Option<String> {
    let first = path.strip_prefix(dir).ok()?.components().next()?;
    let name = first.as_os_str().to_str()?.split('.').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result: Result<()> = (|| {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        write(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| JqlError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn decode_row(table: &Table, pk: &str, fields: &EncodedEntry) -> Result<Row> {
    let primary = table.primary();
    let mut row = Row::with_capacity(table.columns().len());
    for (i, column) in table.columns().iter().enumerate() {
        let decoded = if i == primary {
            column.kind.reverse("", pk).and_then(|cell| {
                if cell.format("") == pk {
                    Ok(cell)
                } else {
                    Err(format!("key is not in canonical form ({})", cell.format("")))
                }
            })
        } else {
            column.kind.decode(fields.get(&column.name).unwrap_or(&Primitive::Null))
        };
        let cell = decoded.map_err(|e| {
            JqlError::Schema(format!("{}.{} at pk {pk}: {e}", table.name(), column.name))
        })?;
        row.push(cell);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TASKS: &str = r#"{
        "_schemata": {
            "tasks.id": {"type": "string", "primary": true},
            "tasks.due": {"type": "date"},
            "tasks.tags": {"type": "foreigns.tags"},
            "tasks.refs": {"type": "dynamic.backrefs"},
            "tags.name": {"type": "string", "primary": true}
        },
        "tasks": {
            "t1": {"due": 10, "tags": ["a", "b"], "refs": 3},
            "t2": {}
        },
        "tags": {"a": {}, "b": {}}
    }"#;

    fn load(json: &str) -> Result<Database> {
        ObjectStoreMapper::default().load_bytes(json.as_bytes())
    }

    #[test]
    fn test_load_builds_typed_rows() {
        let db = load(TASKS).unwrap();
        let tasks = db.table("tasks").unwrap();
        let names: Vec<_> = tasks.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["due", "id", "tags"]);
        let row = tasks.row("t1").unwrap();
        assert_eq!(row[0].format(""), "11 Jan 1970");
        assert_eq!(row[1].format(""), "t1");
        assert_eq!(row[2].format(""), "2 refs");
        assert_eq!(tasks.row("t2").unwrap()[2].format(""), "0 refs");
    }

    #[test]
    fn test_load_errors_name_the_culprit() {
        let bad_value = r#"{"_schemata": {"t.id": {"type": "string", "primary": true}, "t.n": {"type": "int"}},
            "t": {"x": {"n": "many"}}}"#;
        let err = load(bad_value).unwrap_err().to_string();
        assert!(err.contains("t.n") && err.contains("x"), "{err}");

        let fractional = r#"{"_schemata": {"t.id": {"type": "string", "primary": true}, "t.n": {"type": "int"}},
            "t": {"x": {"n": 3.5}}}"#;
        let err = load(fractional).unwrap_err().to_string();
        assert!(err.contains("t.n at pk x"), "{err}");

        let no_primary = r#"{"_schemata": {"t.a": {"type": "string"}}, "t": {"x": {}}}"#;
        assert!(load(no_primary).unwrap_err().to_string().contains("no primary"));

        let no_schema = r#"{"_schemata": {}, "t": {"x": {}}}"#;
        assert!(matches!(load(no_schema), Err(JqlError::Schema(_))));

        assert!(matches!(load("not json"), Err(JqlError::Json(_))));
    }

    #[test]
    fn test_empty_schema_table_is_materialized() {
        let db = load(r#"{"_schemata": {"t.id": {"type": "string", "primary": true}}}"#).unwrap();
        assert!(db.table("t").unwrap().is_empty());
    }

    #[test]
    fn test_store_omits_primary_and_keeps_schemata() {
        let mapper = ObjectStoreMapper::default();
        let db = load(TASKS).unwrap();
        let encoded = mapper.encode(&db);
        let t1 = &encoded["tasks"]["t1"];
        assert!(!t1.contains_key("id"));
        assert_eq!(t1["due"], Primitive::Integer(10));
        assert!(!t1.contains_key("refs"));
        assert_eq!(encoded[SCHEMA_TABLE]["tasks.refs"]["type"], Primitive::from("dynamic.backrefs"));
    }

    #[test]
    fn test_bytes_roundtrip_is_stable() {
        let mapper = ObjectStoreMapper::default();
        let db = load(TASKS).unwrap();
        let first = mapper.store_bytes(&db).unwrap();
        let reloaded = mapper.load_bytes(&first).unwrap();
        assert_eq!(reloaded, db);
        assert_eq!(mapper.store_bytes(&reloaded).unwrap(), first);
    }

    #[test]
    fn test_file_and_directory_layouts() {
        let dir = tempdir().unwrap();
        let mapper = ObjectStoreMapper::default();
        let db = load(TASKS).unwrap();

        let file = dir.path().join("db.json");
        mapper.store_path(&db, &file).unwrap();
        assert!(!dir.path().join("db.json.tmp").exists());
        assert_eq!(mapper.load_path(&file).unwrap(), db);

        let shards = dir.path().join("db.jql");
        mapper.store_path(&db, &shards).unwrap();
        assert!(shards.join("_schemata.json").exists());
        assert!(shards.join("tags.json").exists());
        assert_eq!(mapper.load_path(&shards).unwrap(), db);

        let err = mapper.store_path(&db, &dir.path().join("db.txt")).unwrap_err();
        assert!(matches!(err, JqlError::Config(_)));
    }

    #[test]
    fn test_fields_outside_the_schema_are_ignored() {
        let db = load(
            r#"{"_schemata": {"pages.url": {"type": "string", "primary": true}},
                "pages": {"a": {"stale": "x"}}}"#,
        )
        .unwrap();
        assert_eq!(db.table("pages").unwrap().len(), 1);
        assert!(!ObjectStoreMapper::default().encode(&db)["pages"]["a"].contains_key("stale"));
    }

    #[test]
    fn test_floats_and_mixed_arrays_load() {
        let db = load(
            r#"{"_schemata": {
                    "t.id": {"type": "string", "primary": true},
                    "t.n": {"type": "int", "features": {"weights": [1, 2.5, "x"]}}
                },
                "t": {"a": {"n": 3.0}, "b": {"n": -1e2}}}"#,
        )
        .unwrap();
        let t = db.table("t").unwrap();
        assert_eq!(t.row("a").unwrap()[1].format(""), "3");
        assert_eq!(t.row("b").unwrap()[1].format(""), "-100");
    }

    #[test]
    fn test_shard_hash() {
        assert_eq!(shard_hash(""), "c5");
        assert_eq!(shard_hash("a"), "ed");
        assert_eq!(shard_hash("alpha"), "10");
    }

    #[test]
    fn test_sharded_directory_reads_nested_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("db.jql");
        fs::create_dir_all(root.join("pages")).unwrap();
        fs::write(
            root.join("_schemata.json"),
            r#"{"pages.url": {"type": "string", "primary": true, "primary_shards": 256}}"#,
        )
        .unwrap();
        fs::write(root.join("pages").join("3f.json"), r#"{"a": {}}"#).unwrap();
        fs::write(root.join("pages").join("41.json"), r#"{"b": {}}"#).unwrap();

        let mapper = ObjectStoreMapper::default();
        let db = mapper.load_path(&root).unwrap();
        let pages = db.table("pages").unwrap();
        assert_eq!(pages.len(), 2);

        // Rows move to the file their key hashes to; the old files go away
        mapper.store_path(&db, &root).unwrap();
        assert!(root.join("pages").join(format!("{}.json", shard_hash("a"))).exists());
        assert!(!root.join("pages.json").exists());
        assert_eq!(mapper.load_path(&root).unwrap(), db);
    }

    #[test]
    fn test_sharded_by_key_layout() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("db.jql");
        let mapper = ObjectStoreMapper::default();
        let db = load(
            r#"{"_schemata": {
                    "notes.id": {"type": "string", "primary": true},
                    "notes.topic": {"type": "string", "primary_shards": 256, "secondary_shards": -1}
                },
                "notes": {"n1": {"topic": "alpha"}, "n2": {"topic": "alpha"}, "n3": {"topic": "a/b"}}}"#,
        )
        .unwrap();

        mapper.store_path(&db, &root).unwrap();
        let alpha = root.join("notes").join(shard_hash("alpha")).join("alpha.json");
        let shard: EncodedTable = serde_json::from_slice(&fs::read(&alpha).unwrap()).unwrap();
        assert_eq!(shard.keys().collect::<Vec<_>>(), ["n1", "n2"]);
        assert!(root.join("notes").join(shard_hash("a_b")).join("a_b.json").exists());
        assert_eq!(mapper.load_path(&root).unwrap(), db);
    }
}
