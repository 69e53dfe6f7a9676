//! Wire protocol between `RemoteDbms` and `DbmsServer`
//!
//! Framing:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]
//!
//! Requests are maps tagged by `cmd` with an optional `requestId` the
//! server echoes back. Responses are untagged; an error response is
//! `{error, code}` and the client rebuilds it as `JqlError::Remote`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    DeleteRowRequest, GetRowRequest, GetRowResponse, IncrementEntryRequest, IncrementEntryResponse,
    ListRowsRequest, ListRowsResponse, TableMeta, WriteRowRequest,
};
use crate::error::{JqlError, Result};

/// Request from client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    ListTables,
    ListRows(ListRowsRequest),
    GetRow(GetRowRequest),
    WriteRow(WriteRowRequest),
    DeleteRow(DeleteRowRequest),
    IncrementEntry(IncrementEntryRequest),
    Persist,
    GetSnapshot,
    LoadSnapshot {
        #[serde(with = "serde_bytes")]
        snapshot: Vec<u8>,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::ListTables => "ListTables",
            Request::ListRows(_) => "ListRows",
            Request::GetRow(_) => "GetRow",
            Request::WriteRow(_) => "WriteRow",
            Request::DeleteRow(_) => "DeleteRow",
            Request::IncrementEntry(_) => "IncrementEntry",
            Request::Persist => "Persist",
            Request::GetSnapshot => "GetSnapshot",
            Request::LoadSnapshot { .. } => "LoadSnapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    pub tables: Vec<TableMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "serde_bytes")]
    pub snapshot: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<ErrorBody> for JqlError {
    fn from(body: ErrorBody) -> Self {
        JqlError::Remote {
            code: body.code,
            message: body.error,
        }
    }
}

/// Response to client
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Error(ErrorBody),
    Tables(Tables),
    Rows(ListRowsResponse),
    Row(GetRowResponse),
    Incremented(IncrementEntryResponse),
    Snapshot(Snapshot),
    Ok(Ack),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(Ack { ok: true })
    }

    pub fn error(e: &JqlError) -> Self {
        Response::Error(ErrorBody {
            error: e.to_string(),
            code: e.code().to_string(),
        })
    }
}

/// Request envelope: carries an optional requestId for echo-back
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub request: Request,
}

/// Response envelope as written by the server
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub response: Response,
}

/// Response envelope as read by the client, for one expected body type
#[derive(Debug, Deserialize)]
pub struct ReplyEnvelope<T> {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub body: T,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| JqlError::Encoding(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| JqlError::Encoding(e.to_string()))
}

/// Decode a reply, surfacing a server error body as `JqlError::Remote`
pub fn decode_reply<T: DeserializeOwned>(bytes: &[u8]) -> Result<ReplyEnvelope<T>> {
    if let Ok(err) = rmp_serde::from_slice::<ErrorBody>(bytes) {
        return Err(err.into());
    }
    decode(bytes)
}

/// Read one frame. `Ok(None)` means the peer closed the connection cleanly.
pub async fn read_frame<R>(reader: &mut R, max_payload_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(JqlError::Transport(e.to_string())),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload_size {
        return Err(JqlError::PayloadTooLarge {
            size: len,
            max: max_payload_size,
        });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| JqlError::Transport(e.to_string()))?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, data: &[u8], max_payload_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    check_size(data.len(), max_payload_size)?;
    let len = data.len() as u32;
    let io = |e: std::io::Error| JqlError::Transport(e.to_string());
    writer.write_all(&len.to_be_bytes()).await.map_err(io)?;
    writer.write_all(data).await.map_err(io)?;
    writer.flush().await.map_err(io)?;
    Ok(())
}

pub fn check_size(size: usize, max_payload_size: usize) -> Result<()> {
    if size > max_payload_size || size > u32::MAX as usize {
        return Err(JqlError::PayloadTooLarge {
            size,
            max: max_payload_size,
        });
    }
    Ok(())
}
