//! Macro driver against real child processes

use std::sync::Arc;
use std::time::Duration;

use jqldb::api::macros::{CurrentView, ViewFilter, ERROR_LOG};
use jqldb::api::{ListRowsRequest, WriteRowRequest};
use jqldb::{run_macro, Dbms, JqlError, LocalDbms, ObjectStoreMapper};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DB: &str = r#"{
    "_schemata": {
        "pages.url": {"type": "string", "primary": true},
        "pages.title": {"type": "string"}
    },
    "pages": {"alpha": {"title": "first"}, "beta": {"title": "second"}}
}"#;

fn open() -> LocalDbms {
    LocalDbms::new(ObjectStoreMapper::default().load_bytes(DB.as_bytes()).unwrap())
}

fn view() -> CurrentView {
    CurrentView {
        table: "pages".into(),
        pks: vec!["alpha".into(), "beta".into()],
        primary_selection: "alpha".into(),
        primary_column: "url".into(),
        filter: ViewFilter {
            field: "title".into(),
            formatted: "fir".into(),
        },
        order_by: "url".into(),
        order_dec: false,
    }
}

#[tokio::test]
async fn test_identity_macro_leaves_database_unchanged() {
    let dbms = open();
    let cancel = CancellationToken::new();
    let before = dbms.get_snapshot(&cancel).await.unwrap();

    let output = run_macro(&dbms, &cancel, "/bin/cat", view(), false).await.unwrap();
    assert_eq!(output.current_view, view());
    assert_eq!(output.snapshot.as_bytes(), before.as_slice());

    assert_eq!(dbms.get_snapshot(&cancel).await.unwrap(), before);
}

#[tokio::test]
async fn test_v2_local_still_sends_snapshot() {
    let dbms = open();
    let cancel = CancellationToken::new();
    let output = run_macro(&dbms, &cancel, "/bin/cat", view(), true).await.unwrap();
    assert!(output.address.is_empty());
    assert!(!output.snapshot.is_empty());
}

#[tokio::test]
async fn test_macro_output_replaces_database() {
    let dbms = open();
    let cancel = CancellationToken::new();

    run_macro(&dbms, &cancel, "sed s/alpha/omega/g", view(), false)
        .await
        .unwrap();

    let rows = dbms
        .list_rows(
            &cancel,
            ListRowsRequest {
                table: "pages".into(),
                order_by: "url".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let pks: Vec<_> = rows.rows.iter().map(|r| r.pk.as_str()).collect();
    assert_eq!(pks, ["beta", "omega"]);
}

#[tokio::test]
async fn test_failing_macro_reports_error_log() {
    let dbms = open();
    let cancel = CancellationToken::new();
    let before = dbms.get_snapshot(&cancel).await.unwrap();

    let err = run_macro(&dbms, &cancel, "/bin/false", view(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, JqlError::Macro(_)));
    assert!(err.to_string().contains(ERROR_LOG), "{err}");
    assert_eq!(dbms.get_snapshot(&cancel).await.unwrap(), before);
}

#[tokio::test]
async fn test_malformed_output_is_an_error() {
    let dbms = open();
    let cancel = CancellationToken::new();
    let err = run_macro(&dbms, &cancel, "echo not-json", view(), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unmarshal"), "{err}");
}

#[tokio::test]
async fn test_bad_snapshot_from_macro_keeps_database() {
    let dbms = open();
    let cancel = CancellationToken::new();
    let before = dbms.get_snapshot(&cancel).await.unwrap();

    // Renaming the schema key breaks the column name
    let err = run_macro(&dbms, &cancel, "sed s/pages.url/pagesurl/", view(), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("could not load database"), "{err}");
    assert_eq!(dbms.get_snapshot(&cancel).await.unwrap(), before);
}

#[tokio::test]
async fn test_missing_program() {
    let dbms = open();
    let err = run_macro(&dbms, &CancellationToken::new(), "/nonexistent/macro", view(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, JqlError::Macro(_)));
}

#[tokio::test]
async fn test_write_during_macro_waits_for_reload() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("slow.sh");
    std::fs::write(&script, "sleep 1\nexec cat\n").unwrap();

    let dbms = Arc::new(open());
    let cancel = CancellationToken::new();
    let running = {
        let dbms = dbms.clone();
        let cancel = cancel.clone();
        let command = format!("/bin/sh {}", script.display());
        tokio::spawn(async move { run_macro(dbms.as_ref(), &cancel, &command, view(), false).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    dbms.write_row(
        &cancel,
        WriteRowRequest {
            table: "pages".into(),
            pk: "gamma".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    running.await.unwrap().unwrap();

    let rows = dbms
        .list_rows(
            &cancel,
            ListRowsRequest {
                table: "pages".into(),
                order_by: "url".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let pks: Vec<_> = rows.rows.iter().map(|r| r.pk.as_str()).collect();
    assert_eq!(pks, ["alpha", "beta", "gamma"]);
}
