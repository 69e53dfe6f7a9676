//! jqldb - embeddable JSON-backed table store
//!
//! Tables of typed cells live in one human-readable JSON document (or a
//! directory of per-table shards). Every front end talks to the data through
//! the same [`Dbms`] service, either in-process ([`LocalDbms`]) or over TCP
//! ([`RemoteDbms`] against a [`DbmsServer`]).

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod osm;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;

pub use api::{run_macro, Dbms, DbmsServer, LocalDbms, RemoteDbms};
pub use config::{Config, Mode};
pub use database::Database;
pub use error::{JqlError, Result};
pub use osm::ObjectStoreMapper;
pub use types::{Cell, EntryType};
