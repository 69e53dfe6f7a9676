//! TCP server exposing a `Dbms` to remote clients
//!
//! One task per connection. Each connection reads a frame, dispatches it to
//! the wrapped service and writes the response frame back, until the client
//! hangs up or the server is cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{
    self, read_frame, write_frame, Request, RequestEnvelope, Response, ResponseEnvelope, Snapshot, Tables,
};
use super::Dbms;
use crate::error::{JqlError, Result};

// Global client ID counter
static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone)]
pub struct DbmsServer {
    dbms: Arc<dyn Dbms>,
    max_payload_size: usize,
}

impl DbmsServer {
    pub fn new(dbms: Arc<dyn Dbms>, max_payload_size: usize) -> Self {
        DbmsServer { dbms, max_payload_size }
    }

    /// Accept connections until `cancel` fires
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "listening");
        }
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(client_id, %peer, "client connected");
                    let server = self.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        server.handle_client(stream, client_id, cancel).await;
                    });
                }
                Err(e) => tracing::warn!("accept error: {}", e),
            }
        }
        tracing::info!("server stopped");
        Ok(())
    }

    async fn handle_client(&self, mut stream: TcpStream, client_id: usize, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = read_frame(&mut stream, self.max_payload_size) => msg,
            };
            let msg = match msg {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::info!(client_id, "client disconnected");
                    break;
                }
                Err(e @ JqlError::PayloadTooLarge { .. }) => {
                    // The oversized body is still in the socket; report and hang up
                    tracing::warn!(client_id, "rejecting frame: {}", e);
                    let _ = self.reply(&mut stream, None, Response::error(&e)).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(client_id, "read error: {}", e);
                    break;
                }
            };

            let (request_id, response) = match protocol::decode::<RequestEnvelope>(&msg) {
                Ok(env) => {
                    tracing::debug!(client_id, cmd = env.request.name(), "dispatch");
                    let response = dispatch(self.dbms.as_ref(), &cancel, env.request).await;
                    (env.request_id, response)
                }
                Err(e) => {
                    let e = JqlError::Encoding(format!("invalid request: {e}"));
                    (None, Response::error(&e))
                }
            };

            if let Err(e) = self.reply(&mut stream, request_id, response).await {
                tracing::warn!(client_id, "write error: {}", e);
                break;
            }
        }
    }

    async fn reply(&self, stream: &mut TcpStream, request_id: Option<u64>, response: Response) -> Result<()> {
        let bytes = protocol::encode(&ResponseEnvelope { request_id, response })?;
        let bytes = match protocol::check_size(bytes.len(), self.max_payload_size) {
            Ok(()) => bytes,
            Err(e) => protocol::encode(&ResponseEnvelope {
                request_id,
                response: Response::error(&e),
            })?,
        };
        write_frame(stream, &bytes, self.max_payload_size).await
    }
}

/// Run one request against a service
pub async fn dispatch(dbms: &dyn Dbms, cancel: &CancellationToken, request: Request) -> Response {
    let result = match request {
        Request::ListTables => dbms
            .list_tables(cancel)
            .await
            .map(|tables| Response::Tables(Tables { tables })),
        Request::ListRows(req) => dbms.list_rows(cancel, req).await.map(Response::Rows),
        Request::GetRow(req) => dbms.get_row(cancel, req).await.map(Response::Row),
        Request::WriteRow(req) => dbms.write_row(cancel, req).await.map(|_| Response::ok()),
        Request::DeleteRow(req) => dbms.delete_row(cancel, req).await.map(|_| Response::ok()),
        Request::IncrementEntry(req) => dbms
            .increment_entry(cancel, req)
            .await
            .map(Response::Incremented),
        Request::Persist => dbms.persist(cancel).await.map(|_| Response::ok()),
        Request::GetSnapshot => dbms
            .get_snapshot(cancel)
            .await
            .map(|snapshot| Response::Snapshot(Snapshot { snapshot })),
        Request::LoadSnapshot { snapshot } => dbms
            .load_snapshot(cancel, snapshot)
            .await
            .map(|_| Response::ok()),
    };
    result.unwrap_or_else(|e| Response::error(&e))
}
