//! External macro driver
//!
//! A macro is a program that reads a JSON [`MacroInterface`] on stdin and
//! writes one back on stdout. In-process services hand the macro a full
//! snapshot and load whatever snapshot comes back. With `v2` and a network
//! backed service the macro gets the service address instead and is
//! expected to talk to the service itself.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::Dbms;
use crate::error::{JqlError, Result};

/// Where a failing macro's stderr is written
pub const ERROR_LOG: &str = "/tmp/error.log";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewFilter {
    pub field: String,
    pub formatted: String,
}

/// The caller's UI focus, passed through to the macro and back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentView {
    pub table: String,
    pub pks: Vec<String>,
    pub primary_selection: String,
    pub primary_column: String,
    pub filter: ViewFilter,
    pub order_by: String,
    pub order_dec: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroInterface {
    pub snapshot: String,
    pub address: String,
    pub current_view: CurrentView,
}

/// Run `command` (split on spaces, no shell) as a macro over `dbms`.
///
/// Returns the macro's output, whose `current_view` is where the caller
/// should move focus. The service decides how the exchange is isolated
/// from its other callers; see [`Dbms::run_macro`].
pub async fn run_macro(
    dbms: &dyn Dbms,
    cancel: &CancellationToken,
    command: &str,
    current_view: CurrentView,
    v2: bool,
) -> Result<MacroInterface> {
    dbms.run_macro(cancel, command, current_view, v2).await
}

/// Macro exchange built from separate service calls.
///
/// Writes that reach the service between the snapshot and the reload are
/// replaced by the macro's output. With `v2` over a network service the
/// macro talks to the service itself and nothing is reloaded.
pub async fn exchange<D>(
    dbms: &D,
    cancel: &CancellationToken,
    command: &str,
    current_view: CurrentView,
    v2: bool,
) -> Result<MacroInterface>
where
    D: Dbms + ?Sized,
{
    if let Some(addr) = dbms.address().filter(|_| v2) {
        let input = MacroInterface {
            address: addr.to_string(),
            current_view,
            ..Default::default()
        };
        return run_interface(cancel, command, &input).await;
    }

    let snapshot = dbms.get_snapshot(cancel).await?;
    let output = run_with_snapshot(cancel, command, current_view, snapshot).await?;
    dbms.load_snapshot(cancel, output.snapshot.clone().into_bytes())
        .await
        .map_err(reload_error)?;
    Ok(output)
}

/// Hand `snapshot` to the macro and return its output. Loading the output
/// snapshot is left to the caller.
pub async fn run_with_snapshot(
    cancel: &CancellationToken,
    command: &str,
    current_view: CurrentView,
    snapshot: Vec<u8>,
) -> Result<MacroInterface> {
    let input = MacroInterface {
        snapshot: String::from_utf8(snapshot)
            .map_err(|e| JqlError::Macro(format!("snapshot is not valid UTF-8: {e}")))?,
        current_view,
        ..Default::default()
    };
    run_interface(cancel, command, &input).await
}

pub(crate) fn reload_error(e: JqlError) -> JqlError {
    JqlError::Macro(format!("could not load database from macro: {e}"))
}

async fn run_interface(
    cancel: &CancellationToken,
    command: &str,
    input: &MacroInterface,
) -> Result<MacroInterface> {
    let encoded = serde_json::to_vec(input)
        .map_err(|e| JqlError::Macro(format!("could not marshal input: {e}")))?;
    let stdout = run_child(cancel, command, &encoded).await?;
    serde_json::from_slice(&stdout)
        .map_err(|e| JqlError::Macro(format!("could not unmarshal macro output: {e}")))
}

async fn run_child(cancel: &CancellationToken, command: &str, input: &[u8]) -> Result<Vec<u8>> {
    let mut parts = command.split(' ').filter(|p| !p.is_empty());
    let program = parts
        .next()
        .ok_or_else(|| JqlError::Macro("empty macro command".to_string()))?;

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JqlError::Macro(format!("could not run macro {program}: {e}")))?;
    tracing::debug!(program, "macro started");

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| JqlError::Macro("macro stdin unavailable".to_string()))?;

    // Feed stdin while collecting output so a chatty child cannot block on a full pipe
    let feed = async move {
        let written = stdin.write_all(input).await;
        drop(stdin);
        written
    };
    let run = async { tokio::join!(feed, child.wait_with_output()) };

    let (fed, output) = tokio::select! {
        _ = cancel.cancelled() => return Err(JqlError::Cancelled),
        done = run => done,
    };
    let output = output.map_err(|e| JqlError::Macro(format!("could not wait for macro: {e}")))?;

    if !output.status.success() {
        if let Err(e) = tokio::fs::write(ERROR_LOG, &output.stderr).await {
            tracing::warn!("could not store macro stderr: {}", e);
            return Err(JqlError::Macro(format!(
                "could not run macro or store stderr: {}",
                output.status
            )));
        }
        return Err(JqlError::Macro(format!(
            "could not run macro: {} -- error at {ERROR_LOG}",
            output.status
        )));
    }
    // A child that exits cleanly without reading all of stdin is fine
    if let Err(e) = fed {
        tracing::debug!("macro closed stdin early: {}", e);
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_field_names() {
        let view = CurrentView {
            table: "tasks".into(),
            pks: vec!["t1".into()],
            order_dec: true,
            ..Default::default()
        };
        let json = serde_json::to_value(MacroInterface {
            current_view: view,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["current_view"]["table"], "tasks");
        assert_eq!(json["current_view"]["order_dec"], true);
        assert_eq!(json["current_view"]["filter"]["formatted"], "");
        assert_eq!(json["snapshot"], "");
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed: MacroInterface = serde_json::from_str(r#"{"current_view": {"table": "x"}}"#).unwrap();
        assert_eq!(parsed.current_view.table, "x");
        assert!(parsed.snapshot.is_empty());
    }
}
