//! Wire protocol of the sync socket.
//!
//! The socket interleaves two streams: JSON text frames dispatched on
//! an `op` tag, and raw binary frames carrying blob pieces during a
//! push upload or pull download. Replies are duck-typed: some carry a
//! `res` tag, some an `op` tag, some neither, so outgoing frames are
//! built shape by shape instead of through one tagged enum.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::DocumentRecord;

/// Advertised vault size limit: 10 GiB. Reported to the client on the
/// `size` op, never enforced on upload.
pub const SYNC_SIZE_LIMIT: i64 = 10 * 1024 * 1024 * 1024;

/// One blob piece: up to 2 MiB per binary frame.
pub const CHUNK_SIZE: i64 = 2 * 1024 * 1024;

pub fn size_to_pieces(size: i64) -> i64 {
    (size + CHUNK_SIZE - 1) / CHUNK_SIZE
}

/// Client messages, tagged by `op`. Unknown tags land in `Unknown` and
/// are answered with a plain ok.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Init(Init),
    Ping,
    Size,
    Push(Push),
    Pull { uid: i64 },
    Deleted,
    History { path: String, last: i64 },
    Restore { uid: i64 },
    #[serde(other)]
    Unknown,
}

/// Vault ids arrive as either a JSON string or a number depending on
/// the client build.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VaultId {
    Int(i64),
    Str(String),
}

impl VaultId {
    pub fn parse(&self) -> Result<i64> {
        match self {
            VaultId::Int(id) => Ok(*id),
            VaultId::Str(s) => s
                .parse()
                .map_err(|_| Error::validation(format!("invalid vault id: {s}"))),
        }
    }
}

/// First message on every connection.
#[derive(Debug, Deserialize)]
pub struct Init {
    pub token: String,
    pub device: String,
    pub id: VaultId,
    pub keyhash: String,
    pub version: i64,
    pub initial: bool,
}

#[derive(Debug, Deserialize)]
pub struct Push {
    pub path: String,
    #[serde(default)]
    pub relatedpath: Option<String>,
    #[serde(default)]
    pub hash: String,
    pub folder: bool,
    pub deleted: bool,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub pieces: i64,
    pub ctime: i64,
    pub mtime: i64,
}

/// A record as broadcast to clients. `size` is omitted for folders and
/// deletions.
#[derive(Debug, Clone)]
pub struct RecordPayload {
    pub uid: i64,
    pub path: String,
    pub hash: String,
    pub folder: bool,
    pub deleted: bool,
    pub ctime: i64,
    pub mtime: i64,
    pub size: Option<i64>,
}

impl From<&DocumentRecord> for RecordPayload {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            uid: record.id,
            path: record.path.clone(),
            hash: record.hash.clone(),
            folder: record.folder,
            deleted: record.deleted,
            ctime: record.ctime,
            mtime: record.mtime,
            size: (!record.folder && !record.deleted).then_some(record.size),
        }
    }
}

/// A record in `history` and `deleted` replies. `ts` is the server
/// insert time in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub uid: i64,
    pub path: String,
    pub relatedpath: String,
    pub folder: bool,
    pub device: String,
    pub size: i64,
    pub deleted: bool,
    pub ts: i64,
}

impl From<&DocumentRecord> for HistoryItem {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            uid: record.id,
            path: record.path.clone(),
            relatedpath: record.relatedpath.clone(),
            folder: record.folder,
            device: record.device.clone(),
            size: record.size,
            deleted: record.deleted,
            ts: record.created_at.timestamp_millis(),
        }
    }
}

/// Everything the server can put on the socket. A connection funnels
/// all of these through one queue so text and binary frames keep their
/// order.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Ok,
    Err(String),
    /// Flow control during push upload: ask the client for the next
    /// chunk. The client treats any `res` other than `"ok"` this way.
    MissingBlobs,
    Pong,
    Push(RecordPayload),
    Ready { version: i64 },
    VaultSize { size: i64 },
    PullInfo { size: i64, pieces: i64, deleted: bool },
    DeletedItems { items: Vec<HistoryItem> },
    HistoryItems { items: Vec<HistoryItem> },
    Internal { msg: String },
    Binary(Bytes),
}

impl ServerMessage {
    /// JSON body for text frames; `None` for [`ServerMessage::Binary`].
    pub fn to_json(&self) -> Option<Value> {
        let value = match self {
            ServerMessage::Ok => json!({"res": "ok"}),
            ServerMessage::Err(err) => json!({"res": "err", "err": err}),
            ServerMessage::MissingBlobs => json!({"res": "missing-blobs"}),
            ServerMessage::Pong => json!({"op": "pong"}),
            ServerMessage::Push(record) => {
                let mut msg = json!({
                    "op": "push",
                    "uid": record.uid,
                    "path": record.path,
                    "hash": record.hash,
                    "folder": record.folder,
                    "deleted": record.deleted,
                    "ctime": record.ctime,
                    "mtime": record.mtime,
                });
                if let Some(size) = record.size {
                    msg["size"] = size.into();
                }
                msg
            }
            ServerMessage::Ready { version } => json!({"op": "ready", "version": version}),
            ServerMessage::VaultSize { size } => json!({"size": size, "limit": SYNC_SIZE_LIMIT}),
            ServerMessage::PullInfo {
                size,
                pieces,
                deleted,
            } => json!({"size": size, "pieces": pieces, "deleted": deleted}),
            ServerMessage::DeletedItems { items } => json!({"items": items}),
            ServerMessage::HistoryItems { items } => json!({"items": items, "more": false}),
            ServerMessage::Internal { msg } => json!({"err": "internal error", "msg": msg}),
            ServerMessage::Binary(_) => return None,
        };
        Some(value)
    }
}
