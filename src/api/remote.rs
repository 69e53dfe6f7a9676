//! Network client for a `DbmsServer`
//!
//! Holds one connection, used by one request at a time. A connection that
//! fails or is cancelled mid-exchange is dropped and re-established on the
//! next call.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::protocol::{self, read_frame, write_frame, Ack, Request, RequestEnvelope, Snapshot, Tables};
use super::{
    DeleteRowRequest, Dbms, GetRowRequest, GetRowResponse, IncrementEntryRequest, IncrementEntryResponse,
    ListRowsRequest, ListRowsResponse, TableMeta, WriteRowRequest,
};
use crate::error::{JqlError, Result};

pub struct RemoteDbms {
    addr: String,
    max_payload_size: usize,
    conn: Mutex<Option<TcpStream>>,
    next_request_id: AtomicU64,
}

impl RemoteDbms {
    /// Connect eagerly so a bad address fails at startup
    pub async fn connect(addr: &str, max_payload_size: usize) -> Result<Self> {
        let stream = dial(addr).await?;
        tracing::info!(addr, "connected to jqld");
        Ok(RemoteDbms {
            addr: addr.to_string(),
            max_payload_size,
            conn: Mutex::new(Some(stream)),
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, cancel: &CancellationToken, request: Request) -> Result<T> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let cmd = request.name();
        let body = protocol::encode(&RequestEnvelope {
            request_id: Some(request_id),
            request,
        })?;
        protocol::check_size(body.len(), self.max_payload_size)?;

        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(dial(&self.addr).await?);
        }
        let Some(stream) = conn.as_mut() else {
            return Err(JqlError::Transport("no connection".to_string()));
        };

        let exchanged = tokio::select! {
            _ = cancel.cancelled() => Err(JqlError::Cancelled),
            reply = exchange(stream, &body, self.max_payload_size) => reply,
        };
        let reply = match exchanged {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(cmd, "dropping connection: {}", e);
                *conn = None;
                return Err(e);
            }
        };
        drop(conn);

        let reply = protocol::decode_reply::<T>(&reply)?;
        if let Some(echoed) = reply.request_id {
            if echoed != request_id {
                return Err(JqlError::Transport(format!(
                    "response for request {echoed} while waiting for {request_id}"
                )));
            }
        }
        Ok(reply.body)
    }
}

async fn dial(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| JqlError::Transport(format!("cannot connect to {addr}: {e}")))
}

async fn exchange(stream: &mut TcpStream, body: &[u8], max_payload_size: usize) -> Result<Vec<u8>> {
    write_frame(stream, body, max_payload_size).await?;
    read_frame(stream, max_payload_size)
        .await?
        .ok_or_else(|| JqlError::Transport("connection closed by server".to_string()))
}

#[async_trait]
impl Dbms for RemoteDbms {
    fn address(&self) -> Option<&str> {
        Some(&self.addr)
    }

    async fn list_tables(&self, cancel: &CancellationToken) -> Result<Vec<TableMeta>> {
        let reply: Tables = self.call(cancel, Request::ListTables).await?;
        Ok(reply.tables)
    }

    async fn list_rows(&self, cancel: &CancellationToken, req: ListRowsRequest) -> Result<ListRowsResponse> {
        self.call(cancel, Request::ListRows(req)).await
    }

    async fn get_row(&self, cancel: &CancellationToken, req: GetRowRequest) -> Result<GetRowResponse> {
        self.call(cancel, Request::GetRow(req)).await
    }

    async fn write_row(&self, cancel: &CancellationToken, req: WriteRowRequest) -> Result<()> {
        let _: Ack = self.call(cancel, Request::WriteRow(req)).await?;
        Ok(())
    }

    async fn delete_row(&self, cancel: &CancellationToken, req: DeleteRowRequest) -> Result<()> {
        let _: Ack = self.call(cancel, Request::DeleteRow(req)).await?;
        Ok(())
    }

    async fn increment_entry(
        &self,
        cancel: &CancellationToken,
        req: IncrementEntryRequest,
    ) -> Result<IncrementEntryResponse> {
        self.call(cancel, Request::IncrementEntry(req)).await
    }

    async fn persist(&self, cancel: &CancellationToken) -> Result<()> {
        let _: Ack = self.call(cancel, Request::Persist).await?;
        Ok(())
    }

    async fn get_snapshot(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let reply: Snapshot = self.call(cancel, Request::GetSnapshot).await?;
        Ok(reply.snapshot)
    }

    async fn load_snapshot(&self, cancel: &CancellationToken, snapshot: Vec<u8>) -> Result<()> {
        let _: Ack = self.call(cancel, Request::LoadSnapshot { snapshot }).await?;
        Ok(())
    }
}
