//! Remote service over a loopback TCP socket
//!
//! A `DbmsServer` wraps a `LocalDbms`; every call through `RemoteDbms` must
//! behave like the same call made in-process, errors included.

use std::collections::BTreeMap;
use std::sync::Arc;

use jqldb::api::macros::CurrentView;
use jqldb::api::{FilterSpec, IncrementEntryRequest, ListRowsRequest, WriteRowRequest};
use jqldb::config::DEFAULT_MAX_PAYLOAD_SIZE;
use jqldb::storage::Primitive;
use jqldb::{run_macro, Dbms, DbmsServer, JqlError, LocalDbms, ObjectStoreMapper, RemoteDbms};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const DB: &str = r#"{
    "_schemata": {
        "tasks.id": {"type": "string", "primary": true},
        "tasks.status": {"type": "enum", "features": {"values": "todo, done"}},
        "tasks.budget": {"type": "moneyamt"}
    },
    "tasks": {"t1": {"status": "todo", "budget": 150}, "t2": {"status": "done"}}
}"#;

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    local: Arc<LocalDbms>,
    remote: RemoteDbms,
    shutdown: CancellationToken,
    _dir: TempDir,
}

async fn start(max_payload_size: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.json");
    let db = ObjectStoreMapper::default().load_bytes(DB.as_bytes()).unwrap();
    let local = Arc::new(LocalDbms::with_path(db, path));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    let server = DbmsServer::new(local.clone(), DEFAULT_MAX_PAYLOAD_SIZE);
    let server_cancel = shutdown.clone();
    tokio::spawn(async move {
        server.serve(listener, server_cancel).await.unwrap();
    });

    let remote = RemoteDbms::connect(&addr, max_payload_size).await.unwrap();
    Fixture {
        local,
        remote,
        shutdown,
        _dir: dir,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_remote_matches_local() {
    let fx = start(DEFAULT_MAX_PAYLOAD_SIZE).await;
    let cancel = CancellationToken::new();

    assert_eq!(
        fx.remote.list_tables(&cancel).await.unwrap(),
        fx.local.list_tables(&cancel).await.unwrap()
    );

    let req = ListRowsRequest {
        table: "tasks".into(),
        filters: vec![FilterSpec::equal("status", "todo")],
        order_by: "budget".into(),
        ..Default::default()
    };
    let remote_rows = fx.remote.list_rows(&cancel, req.clone()).await.unwrap();
    assert_eq!(remote_rows, fx.local.list_rows(&cancel, req).await.unwrap());
    assert_eq!(remote_rows.rows[0].entries[0].formatted, "$1.50");

    assert_eq!(
        fx.remote.get_snapshot(&cancel).await.unwrap(),
        fx.local.get_snapshot(&cancel).await.unwrap()
    );
    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_remote_mutations_reach_server() {
    let fx = start(DEFAULT_MAX_PAYLOAD_SIZE).await;
    let cancel = CancellationToken::new();

    let mut fields = BTreeMap::new();
    fields.insert("budget".to_string(), "$2.05".to_string());
    fx.remote
        .write_row(
            &cancel,
            WriteRowRequest {
                table: "tasks".into(),
                pk: "t3".into(),
                fields,
                update_only: false,
            },
        )
        .await
        .unwrap();

    let inc = IncrementEntryRequest {
        table: "tasks".into(),
        pk: "t3".into(),
        column: "budget".into(),
        delta: Primitive::from(-5),
    };
    let r = fx.remote.increment_entry(&cancel, inc).await.unwrap();
    assert_eq!(r.formatted, "$2.00");

    let local = fx
        .local
        .list_rows(&cancel, ListRowsRequest { table: "tasks".into(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(local.total, 3);

    fx.remote.persist(&cancel).await.unwrap();
    let path = fx.local.path().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), fx.local.get_snapshot(&cancel).await.unwrap());
    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_errors_cross_the_wire_verbatim() {
    let fx = start(DEFAULT_MAX_PAYLOAD_SIZE).await;
    let cancel = CancellationToken::new();

    let req = ListRowsRequest {
        table: "nope".into(),
        ..Default::default()
    };
    let local_err = fx.local.list_rows(&cancel, req.clone()).await.unwrap_err();
    let remote_err = fx.remote.list_rows(&cancel, req).await.unwrap_err();
    assert!(matches!(remote_err, JqlError::Remote { .. }));
    assert_eq!(remote_err.code(), local_err.code());
    assert_eq!(remote_err.to_string(), local_err.to_string());

    let err = fx
        .remote
        .load_snapshot(&cancel, b"not json".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CODEC_ERROR");

    // The connection survives server-side errors
    assert_eq!(fx.remote.list_tables(&cancel).await.unwrap().len(), 1);
    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_client_enforces_max_payload() {
    let fx = start(256).await;
    let cancel = CancellationToken::new();

    let mut fields = BTreeMap::new();
    fields.insert("budget".to_string(), "1".repeat(1024));
    let err = fx
        .remote
        .write_row(
            &cancel,
            WriteRowRequest {
                table: "tasks".into(),
                pk: "big".into(),
                fields,
                update_only: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JqlError::PayloadTooLarge { .. }));
    assert_eq!(fx.local.list_tables(&cancel).await.unwrap()[0].len, 2);
    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_cancelled_call_fails_fast() {
    let fx = start(DEFAULT_MAX_PAYLOAD_SIZE).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        fx.remote.list_tables(&cancel).await,
        Err(JqlError::Cancelled)
    ));
    // A fresh connection is dialed for the next call
    let fresh = CancellationToken::new();
    assert_eq!(fx.remote.list_tables(&fresh).await.unwrap().len(), 1);
    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_v2_macro_over_remote_gets_address_only() {
    let fx = start(DEFAULT_MAX_PAYLOAD_SIZE).await;
    let cancel = CancellationToken::new();
    let before = fx.local.get_snapshot(&cancel).await.unwrap();

    let view = CurrentView {
        table: "tasks".into(),
        ..Default::default()
    };
    let output = run_macro(&fx.remote, &cancel, "/bin/cat", view, true).await.unwrap();
    assert_eq!(Some(output.address.as_str()), fx.remote.address());
    assert!(output.snapshot.is_empty());
    assert_eq!(output.current_view.table, "tasks");

    assert_eq!(fx.local.get_snapshot(&cancel).await.unwrap(), before);
    fx.shutdown.cancel();
}
