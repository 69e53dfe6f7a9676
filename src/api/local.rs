//! In-process service over an in-memory database
//!
//! The database sits behind a `tokio::sync::RwLock`. Reads share the lock;
//! every mutation, persist and snapshot load takes it exclusively, so
//! operations are observed in dispatch order and a snapshot load is a full
//! barrier.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::macros::{self, CurrentView, MacroInterface};
use super::{
    Column, DeleteRowRequest, Dbms, Entry, FilterSpec, GetRowRequest, GetRowResponse,
    IncrementEntryRequest, IncrementEntryResponse, ListRowsRequest, ListRowsResponse, Match, Row,
    TableMeta, WriteRowRequest,
};
use crate::database::Database;
use crate::error::{JqlError, Result};
use crate::osm::ObjectStoreMapper;
use crate::storage::Primitive;
use crate::table::{Filter, Matcher, QueryParams, Table};
use crate::types::{Cell, ForeignKey};

pub struct LocalDbms {
    db: RwLock<Database>,
    path: Option<PathBuf>,
    mapper: ObjectStoreMapper,
}

impl LocalDbms {
    /// Serve `db` without a persistence path; `persist` will fail
    pub fn new(db: Database) -> Self {
        LocalDbms {
            db: RwLock::new(db),
            path: None,
            mapper: ObjectStoreMapper::default(),
        }
    }

    pub fn with_path(db: Database, path: impl Into<PathBuf>) -> Self {
        LocalDbms {
            path: Some(path.into()),
            ..Self::new(db)
        }
    }

    /// Load the database at `path`, which must exist
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(JqlError::Config(format!("no database at {}", path.display())));
        }
        let db = ObjectStoreMapper::default().load_path(path)?;
        Ok(Self::with_path(db, path))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the current database under the read lock
    pub async fn read<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self.db.read().await;
        f(&db)
    }
}

fn columns(table: &Table) -> Vec<Column> {
    table.columns().iter().map(Column::from).collect()
}

fn wire_row(pk: &str, cells: &[Cell]) -> Row {
    Row {
        pk: pk.to_string(),
        entries: cells
            .iter()
            .map(|c| Entry { formatted: c.format("") })
            .collect(),
    }
}

fn compile_filter(table: &Table, spec: &FilterSpec) -> Result<Filter> {
    let column = if spec.column.is_empty() {
        None
    } else {
        let i = table.index_of_field(&spec.column).ok_or_else(|| {
            JqlError::InvalidFilter(format!("unknown field {}.{}", table.name(), spec.column))
        })?;
        Some(i)
    };
    let matcher = match &spec.matcher {
        Match::Equal { value } => Matcher::Equal(value.clone()),
        Match::In { values } => Matcher::In(values.iter().cloned().collect()),
        Match::Contains { value, exact } => Matcher::Contains {
            value: value.clone(),
            exact: *exact,
        },
    };
    Ok(Filter {
        column,
        negated: spec.negated,
        matcher,
    })
}

/// Step a foreign key `delta` places through the referenced table's sorted keys.
/// A key that is not present counts from the position it would sort into.
fn step_foreign_key(db: &Database, fk: &ForeignKey, delta: &Primitive) -> Result<Cell> {
    let d = delta.as_i64().ok_or_else(|| {
        JqlError::NotIncrementable(format!("FOREIGN by a {} value", delta.kind()))
    })?;
    let target = db
        .table(&fk.table)
        .ok_or_else(|| JqlError::TableNotFound(fk.table.to_string()))?;
    let mut keys: Vec<&str> = target.keys().collect();
    if keys.is_empty() {
        return Err(JqlError::NotIncrementable(format!(
            "FOREIGN: table {} is empty",
            fk.table
        )));
    }
    keys.sort_unstable();

    let n = keys.len() as i64;
    let index = match keys.binary_search(&fk.key.as_str()) {
        Ok(i) => i as i64 + d,
        Err(i) if d > 0 => i as i64 + d - 1,
        Err(i) => i as i64 + d,
    };
    let key = keys[index.rem_euclid(n) as usize].to_string();
    Ok(Cell::ForeignKey(ForeignKey {
        table: fk.table.clone(),
        key,
    }))
}

#[async_trait]
impl Dbms for LocalDbms {
    async fn list_tables(&self, _cancel: &CancellationToken) -> Result<Vec<TableMeta>> {
        let db = self.db.read().await;
        Ok(db
            .tables()
            .map(|t| TableMeta {
                name: t.name().to_string(),
                columns: columns(t),
                len: t.len(),
            })
            .collect())
    }

    async fn list_rows(&self, _cancel: &CancellationToken, req: ListRowsRequest) -> Result<ListRowsResponse> {
        let db = self.db.read().await;
        let table = db.find_table(&req.table)?;

        let filters = req
            .filters
            .iter()
            .map(|f| compile_filter(table, f))
            .collect::<Result<Vec<_>>>()?;
        let order_by = if req.order_by.is_empty() {
            None
        } else {
            Some(table.field(&req.order_by)?)
        };
        let params = QueryParams {
            filters,
            order_by,
            descending: req.dec,
            offset: req.offset,
            limit: req.limit,
        };

        let result = table.query(&params);
        Ok(ListRowsResponse {
            table: table.name().to_string(),
            rows: result.rows.iter().map(|(pk, row)| wire_row(pk, row)).collect(),
            columns: columns(table),
            total: result.total,
            all: table.len(),
        })
    }

    async fn get_row(&self, _cancel: &CancellationToken, req: GetRowRequest) -> Result<GetRowResponse> {
        let db = self.db.read().await;
        let table = db.find_table(&req.table)?;
        let row = table.row(&req.pk)?;
        Ok(GetRowResponse {
            row: wire_row(&req.pk, row),
            columns: columns(table),
        })
    }

    async fn write_row(&self, _cancel: &CancellationToken, req: WriteRowRequest) -> Result<()> {
        let mut db = self.db.write().await;
        let table = db.find_table_mut(&req.table)?;
        if req.update_only && table.get_row(&req.pk).is_none() {
            return Err(JqlError::RowNotFound {
                table: table.name().to_string(),
                pk: req.pk,
            });
        }
        table.insert_with_fields(&req.pk, &req.fields)
    }

    async fn delete_row(&self, _cancel: &CancellationToken, req: DeleteRowRequest) -> Result<()> {
        let mut db = self.db.write().await;
        db.find_table_mut(&req.table)?.delete(&req.pk)?;
        Ok(())
    }

    async fn increment_entry(
        &self,
        _cancel: &CancellationToken,
        req: IncrementEntryRequest,
    ) -> Result<IncrementEntryResponse> {
        let mut db = self.db.write().await;
        let (name, column, cell) = {
            let table = db.find_table(&req.table)?;
            let column = table.field(&req.column)?;
            let current = &table.row(&req.pk)?[column];
            let cell = match current {
                Cell::ForeignKey(fk) => step_foreign_key(&db, fk, &req.delta)?,
                other => other.add(&req.delta)?,
            };
            (table.name().to_string(), column, cell)
        };
        let formatted = cell.format("");
        db.find_table_mut(&name)?.set_cell(&req.pk, column, cell)?;
        Ok(IncrementEntryResponse { formatted })
    }

    async fn persist(&self, cancel: &CancellationToken) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| JqlError::Config("no persistence path configured".to_string()))?;
        let db = self.db.write().await;
        if cancel.is_cancelled() {
            return Err(JqlError::Cancelled);
        }
        self.mapper.store_path(&db, path)
    }

    async fn get_snapshot(&self, _cancel: &CancellationToken) -> Result<Vec<u8>> {
        let db = self.db.read().await;
        self.mapper.store_bytes(&db)
    }

    async fn load_snapshot(&self, cancel: &CancellationToken, snapshot: Vec<u8>) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(JqlError::Cancelled);
        }
        let fresh = self.mapper.load_bytes(&snapshot)?;
        let mut db = self.db.write().await;
        *db = fresh;
        tracing::info!(tables = db.len(), "loaded snapshot");
        Ok(())
    }

    async fn run_macro(
        &self,
        cancel: &CancellationToken,
        command: &str,
        current_view: CurrentView,
        _v2: bool,
    ) -> Result<MacroInterface> {
        // Held from snapshot to reload so no write lands in between
        let mut db = self.db.write().await;
        let snapshot = self.mapper.store_bytes(&db)?;
        let output = macros::run_with_snapshot(cancel, command, current_view, snapshot).await?;
        let fresh = self
            .mapper
            .load_bytes(output.snapshot.as_bytes())
            .map_err(macros::reload_error)?;
        *db = fresh;
        tracing::info!(command, tables = db.len(), "loaded snapshot from macro");
        Ok(output)
    }
}
