//! Service surface shared by every front end
//!
//! [`Dbms`] is the one logical interface. [`LocalDbms`] serves it from an
//! in-memory [`Database`](crate::database::Database) and [`RemoteDbms`]
//! forwards it over TCP to a [`DbmsServer`] wrapping another `Dbms`.
//! Macros run on the caller's side of either via [`run_macro`].

pub mod local;
pub mod macros;
pub mod protocol;
pub mod remote;
pub mod server;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::schema::ColumnMeta;
use crate::storage::Primitive;
use crate::types::EntryType;

pub use local::LocalDbms;
pub use macros::{run_macro, CurrentView, MacroInterface, ViewFilter};
pub use remote::RemoteDbms;
pub use server::DbmsServer;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub foreign_table: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub primary: bool,
}

impl From<&ColumnMeta> for Column {
    fn from(meta: &ColumnMeta) -> Self {
        Column {
            name: meta.name.clone(),
            entry_type: meta.kind.entry_type(),
            foreign_table: meta.kind.foreign_table().map(str::to_string),
            values: meta.kind.values().to_vec(),
            primary: meta.primary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
    /// Number of rows
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub formatted: String,
}

/// One row, cells in column order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub pk: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Match {
    Equal { value: String },
    In { values: Vec<String> },
    Contains { value: String, exact: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Column name; empty matches against any column
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub negated: bool,
    #[serde(rename = "match")]
    pub matcher: Match,
}

impl FilterSpec {
    pub fn equal(column: &str, value: &str) -> Self {
        Self::new(column, Match::Equal { value: value.to_string() })
    }

    pub fn contains(column: &str, value: &str, exact: bool) -> Self {
        Self::new(column, Match::Contains { value: value.to_string(), exact })
    }

    pub fn new(column: &str, matcher: Match) -> Self {
        FilterSpec { column: column.to_string(), negated: false, matcher }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRowsRequest {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Empty keeps insertion order
    #[serde(default)]
    pub order_by: String,
    #[serde(default)]
    pub dec: bool,
    #[serde(default)]
    pub offset: usize,
    /// 0 means unlimited
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRowsResponse {
    pub table: String,
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    /// Matches before offset and limit
    pub total: usize,
    /// Rows in the table before filtering
    pub all: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRowRequest {
    pub table: String,
    pub pk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRowResponse {
    pub row: Row,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRowRequest {
    pub table: String,
    pub pk: String,
    /// Column name -> user-entered value
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Fail instead of creating the row
    #[serde(default)]
    pub update_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRowRequest {
    pub table: String,
    pub pk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementEntryRequest {
    pub table: String,
    pub pk: String,
    pub column: String,
    pub delta: Primitive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementEntryResponse {
    pub formatted: String,
}

// ============================================================================
// Service
// ============================================================================

/// The request/response surface over one logical database.
///
/// Every call carries a cancellation token, honored at I/O boundaries.
#[async_trait]
pub trait Dbms: Send + Sync {
    /// Network address of the backing service, `None` when in-process
    fn address(&self) -> Option<&str> {
        None
    }

    async fn list_tables(&self, cancel: &CancellationToken) -> Result<Vec<TableMeta>>;

    async fn list_rows(&self, cancel: &CancellationToken, req: ListRowsRequest) -> Result<ListRowsResponse>;

    async fn get_row(&self, cancel: &CancellationToken, req: GetRowRequest) -> Result<GetRowResponse>;

    async fn write_row(&self, cancel: &CancellationToken, req: WriteRowRequest) -> Result<()>;

    async fn delete_row(&self, cancel: &CancellationToken, req: DeleteRowRequest) -> Result<()>;

    async fn increment_entry(
        &self,
        cancel: &CancellationToken,
        req: IncrementEntryRequest,
    ) -> Result<IncrementEntryResponse>;

    /// Write the database to its configured path
    async fn persist(&self, cancel: &CancellationToken) -> Result<()>;

    async fn get_snapshot(&self, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Replace the whole database, schema included. On failure the old one stays.
    async fn load_snapshot(&self, cancel: &CancellationToken, snapshot: Vec<u8>) -> Result<()>;

    /// Pipe the database through an external macro.
    ///
    /// The default builds the exchange from `get_snapshot` and
    /// `load_snapshot`. An in-process service overrides it to hold its
    /// write lock for the whole exchange.
    async fn run_macro(
        &self,
        cancel: &CancellationToken,
        command: &str,
        current_view: CurrentView,
        v2: bool,
    ) -> Result<MacroInterface> {
        macros::exchange(self, cancel, command, current_view, v2).await
    }
}
