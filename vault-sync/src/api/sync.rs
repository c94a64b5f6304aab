//! The sync socket.
//!
//! Each connection is one task that owns its socket: auth on the first
//! frame, then a catch-up task draining the revision log concurrently
//! with the live dispatch loop. All outbound traffic funnels through
//! one queue into a writer task, so broadcasts, replies, and blob
//! chunks never interleave mid-frame and stay FIFO per connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use vault_sync_core::hub::VaultChannel;
use vault_sync_core::model::NewDocumentRecord;
use vault_sync_core::protocol::{
    size_to_pieces, ClientMessage, HistoryItem, Push, RecordPayload, ServerMessage, CHUNK_SIZE,
};
use vault_sync_core::{repo, storage, Error, Result};

use super::AppState;

/// `GET /sync`: plain text for browsers, socket upgrade for clients.
pub async fn index(ws: Option<WebSocketUpgrade>, State(state): State<AppState>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        None => "Sync server".into_response(),
    }
}

/// Debug-only snapshot of the live vault channels.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let vaults: Vec<_> = state
        .hub
        .status()
        .iter()
        .map(|channel| json!({"id": channel.vault_id, "conn_devices": channel.devices}))
        .collect();
    let count = vaults.len();
    Json(json!({"vaults": vaults, "vaults_count": count}))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    // the writer owns the sink; it drains the queue and closes the
    // socket once every sender is gone
    tokio::spawn(write_frames(sink, rx));

    if let Err(err) = run(&mut stream, &tx, &state).await {
        warn!(error = %err, "sync connection failed");
        let msg = if err.is_domain() {
            ServerMessage::Err(err.to_string())
        } else {
            ServerMessage::Internal {
                msg: err.to_string(),
            }
        };
        let _ = tx.send(msg);
    }
}

async fn run(
    stream: &mut SplitStream<WebSocket>,
    tx: &UnboundedSender<ServerMessage>,
    state: &AppState,
) -> Result<()> {
    match SyncConn::auth(stream, tx, state).await? {
        Some(mut conn) => conn.serve().await,
        // closed before init
        None => Ok(()),
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<ServerMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let frame = match msg {
            ServerMessage::Binary(bytes) => Message::Binary(bytes),
            msg => match msg.to_json() {
                Some(value) => Message::Text(value.to_string().into()),
                None => continue,
            },
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

/// Next text frame, or `None` on disconnect. Transport errors count as
/// disconnects too.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Result<Option<String>> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
            Ok(Message::Binary(_)) => return Err(Error::validation("unexpected binary frame")),
            Ok(Message::Close(_)) => return Ok(None),
            // transport-level ping/pong
            Ok(_) => {}
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

fn parse(text: &str) -> Result<ClientMessage> {
    serde_json::from_str(text).map_err(|err| Error::validation(format!("malformed message: {err}")))
}

/// Catch-up task: replay everything past the client's cursor, then mark
/// the hand-over to live broadcasts. Records broadcast while this runs
/// may arrive twice around the seam; the client de-dupes by id.
async fn send_updates(
    pool: SqlitePool,
    vault_id: i64,
    version: i64,
    initial: bool,
    tx: UnboundedSender<ServerMessage>,
) {
    match repo::records::get_updates(&pool, vault_id, version, initial).await {
        Ok((latest, records)) => {
            for record in &records {
                if tx
                    .send(ServerMessage::Push(RecordPayload::from(record)))
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx.send(ServerMessage::Ready { version: latest });
        }
        Err(err) => {
            warn!(vault_id, error = %err, "catch-up failed");
            let _ = tx.send(ServerMessage::Err(err.to_string()));
        }
    }
}

struct SyncConn<'a> {
    state: &'a AppState,
    stream: &'a mut SplitStream<WebSocket>,
    tx: UnboundedSender<ServerMessage>,
    conn_id: Uuid,
    device: String,
    channel: Arc<VaultChannel>,
    catchup: Option<JoinHandle<()>>,
}

impl<'a> SyncConn<'a> {
    /// Handles the `init` handshake: resolve the token, join the vault
    /// channel, ack, and kick off catch-up.
    async fn auth(
        stream: &'a mut SplitStream<WebSocket>,
        tx: &UnboundedSender<ServerMessage>,
        state: &'a AppState,
    ) -> Result<Option<SyncConn<'a>>> {
        let Some(text) = next_text(stream).await? else {
            return Ok(None);
        };
        let ClientMessage::Init(init) = parse(&text)? else {
            return Err(Error::validation("expected init"));
        };

        let token = repo::users::require_token(&state.pool, &init.token).await?;
        let conn_id = Uuid::new_v4();
        let channel = state
            .hub
            .join(
                &state.pool,
                conn_id,
                &init.device,
                token.user_id,
                &init.id,
                &init.keyhash,
                tx.clone(),
            )
            .await?;

        let mut conn = SyncConn {
            state,
            stream,
            tx: tx.clone(),
            conn_id,
            device: init.device,
            channel,
            catchup: None,
        };
        conn.send(ServerMessage::Ok);

        conn.catchup = Some(tokio::spawn(send_updates(
            state.pool.clone(),
            conn.channel.vault_id,
            init.version,
            init.initial,
            conn.tx.clone(),
        )));

        debug!(vault_id = conn.channel.vault_id, device = %conn.device, "sync connection ready");
        Ok(Some(conn))
    }

    async fn serve(&mut self) -> Result<()> {
        while let Some(text) = next_text(self.stream).await? {
            self.dispatch(&text).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, text: &str) -> Result<()> {
        debug!(raw = text, "handle message");

        match parse(text)? {
            ClientMessage::Ping => self.send(ServerMessage::Pong),
            ClientMessage::Size => {
                let size = repo::vaults::get_size(&self.state.pool, self.vault_id()).await?;
                self.send(ServerMessage::VaultSize { size });
            }
            ClientMessage::Push(push) => self.on_push(push).await?,
            ClientMessage::Pull { uid } => self.on_pull(uid).await?,
            ClientMessage::Deleted => {
                let items = repo::records::get_deleted(&self.state.pool, self.vault_id())
                    .await?
                    .iter()
                    .map(HistoryItem::from)
                    .collect();
                self.send(ServerMessage::DeletedItems { items });
            }
            ClientMessage::History { path, last } => {
                let items =
                    repo::records::get_history(&self.state.pool, self.vault_id(), &path, last)
                        .await?
                        .iter()
                        .map(HistoryItem::from)
                        .collect();
                self.send(ServerMessage::HistoryItems { items });
            }
            ClientMessage::Restore { uid } => self.on_restore(uid).await?,
            ClientMessage::Init(_) | ClientMessage::Unknown => {
                warn!(raw = text, "unknown op");
                self.send(ServerMessage::Ok);
            }
        }
        Ok(())
    }

    /// Commits a pushed record, pulling the blob off the client first
    /// when this vault has never seen its hash.
    async fn on_push(&mut self, push: Push) -> Result<()> {
        if !push.folder && !push.deleted {
            // every file record references a blob by hash, uploaded now
            // or not; a hash that cannot address one never gets committed
            if !storage::is_content_hash(&push.hash) {
                return Err(Error::validation(format!(
                    "malformed content hash: {}",
                    push.hash
                )));
            }
            if push.pieces > 0 {
                let count =
                    repo::vaults::hash_count(&self.state.pool, self.vault_id(), &push.hash).await?;
                if count == 0 {
                    self.save_blob(&push.hash, push.pieces).await?;
                }
            }
        }

        let record = NewDocumentRecord {
            vault_id: self.vault_id(),
            path: push.path,
            relatedpath: push.relatedpath.unwrap_or_default(),
            hash: push.hash,
            device: self.device.clone(),
            folder: push.folder,
            deleted: push.deleted,
            size: push.size,
            ctime: push.ctime,
            mtime: push.mtime,
        };
        let record = self.channel.publish(&self.state.pool, record).await?;

        // the record now references the blob; it is no longer pending
        if !record.folder && !record.deleted {
            repo::pending::remove(&self.state.pool, record.vault_id, &record.hash).await?;
        }

        self.send(ServerMessage::Ok);
        Ok(())
    }

    /// Server-pull upload: request each chunk, append it to the blob.
    /// The pending row keeps a crashed upload visible to the purger.
    /// The hash is never verified against the content.
    async fn save_blob(&mut self, hash: &str, pieces: i64) -> Result<()> {
        repo::pending::insert(&self.state.pool, self.vault_id(), hash).await?;

        let mut file = self.state.store.open_write(self.vault_id(), hash).await?;
        for _ in 0..pieces {
            self.send(ServerMessage::MissingBlobs);
            let chunk = self.receive_binary().await?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn on_pull(&mut self, uid: i64) -> Result<()> {
        let record = self.get_record(uid).await?;
        let pieces = size_to_pieces(record.size);
        self.send(ServerMessage::PullInfo {
            size: record.size,
            pieces,
            deleted: record.deleted,
        });

        if record.size > 0 {
            let mut file = self
                .state
                .store
                .open_read(record.vault_id, &record.hash)
                .await?;
            let mut remaining = record.size;
            for _ in 0..pieces {
                let len = remaining.min(CHUNK_SIZE) as usize;
                let mut chunk = vec![0u8; len];
                file.read_exact(&mut chunk).await?;
                self.send(ServerMessage::Binary(chunk.into()));
                remaining -= len as i64;
            }
        }
        Ok(())
    }

    /// Duplicates a historical record as the new head of its path,
    /// attributed to the restoring device and never deleted.
    async fn on_restore(&mut self, uid: i64) -> Result<()> {
        let old = self.get_record(uid).await?;
        let record = NewDocumentRecord {
            vault_id: old.vault_id,
            path: old.path,
            relatedpath: old.relatedpath,
            hash: old.hash,
            device: self.device.clone(),
            folder: old.folder,
            deleted: false,
            size: old.size,
            ctime: old.ctime,
            mtime: old.mtime,
        };
        self.channel.publish(&self.state.pool, record).await?;
        self.send(ServerMessage::Ok);
        Ok(())
    }

    /// Next binary frame of an in-flight transfer. Keepalive pings may
    /// arrive between chunks and are answered in place; any other text
    /// frame aborts the connection.
    async fn receive_binary(&mut self) -> Result<Bytes> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Binary(bytes)) => return Ok(bytes),
                Ok(Message::Text(text)) => {
                    if !matches!(parse(&text)?, ClientMessage::Ping) {
                        return Err(Error::validation("unexpected message during transfer"));
                    }
                    self.send(ServerMessage::Pong);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        Err(Error::validation("disconnected during transfer"))
    }

    async fn get_record(&self, uid: i64) -> Result<vault_sync_core::model::DocumentRecord> {
        repo::records::get(&self.state.pool, self.vault_id(), uid)
            .await?
            .ok_or(Error::RecordNotFound)
    }

    fn vault_id(&self) -> i64 {
        self.channel.vault_id
    }

    fn send(&self, msg: ServerMessage) {
        // a closed queue means the socket is gone; the read side will
        // notice on its own
        let _ = self.tx.send(msg);
    }
}

impl Drop for SyncConn<'_> {
    fn drop(&mut self) {
        if let Some(catchup) = &self.catchup {
            catchup.abort();
        }
        self.state.hub.leave(&self.channel, self.conn_id);
    }
}
