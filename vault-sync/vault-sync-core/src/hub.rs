//! Per-vault fan-out channels for live sync connections.
//!
//! A channel exists while at least one connection is joined to its
//! vault. Channels own no cursor and no persistent state; they are a
//! transient delivery bus between the revision log and the sockets.
//! The map lock and subscriber locks are only ever held around plain
//! memory operations, never across socket I/O: sends go into each
//! connection's unbounded queue and the connection's writer drains it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use crate::crypto;
use crate::error::{Error, Result};
use crate::model::{DocumentRecord, NewDocumentRecord};
use crate::protocol::{RecordPayload, ServerMessage, VaultId};
use crate::repo;

#[derive(Default)]
pub struct VaultChannels {
    channels: Mutex<HashMap<i64, Arc<VaultChannel>>>,
}

pub struct VaultChannel {
    pub vault_id: i64,
    /// Serializes insert + fan-out so every subscriber observes record
    /// ids in increasing order.
    publish_lock: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<Subscriber>>,
}

struct Subscriber {
    conn_id: Uuid,
    device: String,
    tx: UnboundedSender<ServerMessage>,
}

/// Debug snapshot of one live channel.
pub struct ChannelStatus {
    pub vault_id: i64,
    pub devices: Vec<String>,
}

impl VaultChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies the user may sync this vault and registers the
    /// connection, creating the channel lazily.
    ///
    /// Fails with [`Error::VaultNotFound`] when the vault row is
    /// missing or soft-deleted, [`Error::AuthDenied`] when the user is
    /// neither owner nor share member, and [`Error::InvalidKey`] when
    /// the keyhash does not match.
    #[allow(clippy::too_many_arguments)]
    pub async fn join(
        &self,
        pool: &SqlitePool,
        conn_id: Uuid,
        device: &str,
        user_id: i64,
        vault_id: &VaultId,
        keyhash: &str,
        tx: UnboundedSender<ServerMessage>,
    ) -> Result<Arc<VaultChannel>> {
        let vault_id = vault_id.parse()?;
        let vault = repo::vaults::get(pool, vault_id, None, false)
            .await?
            .ok_or(Error::VaultNotFound)?;

        if !repo::vaults::check_access(pool, vault_id, Some(user_id), true).await? {
            return Err(Error::AuthDenied);
        }
        if !crypto::constant_time_eq(&vault.key_hash, keyhash) {
            return Err(Error::InvalidKey);
        }

        let channel = {
            let mut channels = self.channels.lock();
            let channel = channels
                .entry(vault_id)
                .or_insert_with(|| Arc::new(VaultChannel::new(vault_id)))
                .clone();
            channel.subscribers.lock().push(Subscriber {
                conn_id,
                device: device.to_string(),
                tx,
            });
            channel
        };

        debug!(vault_id, device, "vault join");
        Ok(channel)
    }

    /// Unregisters the connection; the last one out drops the channel.
    pub fn leave(&self, channel: &Arc<VaultChannel>, conn_id: Uuid) {
        let mut channels = self.channels.lock();
        let empty = {
            let mut subscribers = channel.subscribers.lock();
            subscribers.retain(|sub| sub.conn_id != conn_id);
            subscribers.is_empty()
        };
        if empty {
            channels.remove(&channel.vault_id);
        }
        debug!(vault_id = channel.vault_id, "vault leave");
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.lock();
        let mut status: Vec<_> = channels
            .values()
            .map(|channel| ChannelStatus {
                vault_id: channel.vault_id,
                devices: channel
                    .subscribers
                    .lock()
                    .iter()
                    .map(|sub| sub.device.clone())
                    .collect(),
            })
            .collect();
        status.sort_by_key(|s| s.vault_id);
        status
    }
}

impl VaultChannel {
    fn new(vault_id: i64) -> Self {
        Self {
            vault_id,
            publish_lock: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Commits a record to the log and fans it out to every joined
    /// connection, the originator included.
    pub async fn publish(
        &self,
        pool: &SqlitePool,
        record: NewDocumentRecord,
    ) -> Result<DocumentRecord> {
        let _guard = self.publish_lock.lock().await;
        let record = repo::records::insert(pool, record).await?;
        self.broadcast(&record);
        Ok(record)
    }

    pub fn broadcast(&self, record: &DocumentRecord) {
        let msg = ServerMessage::Push(RecordPayload::from(record));
        let subscribers = self.subscribers.lock();
        for sub in subscribers.iter() {
            // a closed queue just means the connection is tearing down
            let _ = sub.tx.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tokio::sync::mpsc;

    async fn setup() -> (SqlitePool, i64, i64) {
        let pool = db::connect_memory().await.unwrap();
        db::migrate(&pool).await.unwrap();
        let owner = repo::users::create(&pool, "o", "o@example.com", "pw")
            .await
            .unwrap();
        let vault = repo::vaults::create(&pool, owner.id, "notes", "", "kh", "salt")
            .await
            .unwrap();
        (pool, owner.id, vault.id)
    }

    #[tokio::test]
    async fn join_checks_vault_key_and_access() {
        let (pool, owner_id, vault_id) = setup().await;
        let hub = VaultChannels::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = hub
            .join(
                &pool,
                Uuid::new_v4(),
                "dev",
                owner_id,
                &VaultId::Int(999),
                "kh",
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VaultNotFound));

        let err = hub
            .join(
                &pool,
                Uuid::new_v4(),
                "dev",
                owner_id,
                &VaultId::Int(vault_id),
                "wrong",
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidKey));

        let stranger = repo::users::create(&pool, "s", "s@example.com", "pw")
            .await
            .unwrap();
        let err = hub
            .join(
                &pool,
                Uuid::new_v4(),
                "dev",
                stranger.id,
                &VaultId::Int(vault_id),
                "kh",
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthDenied));

        // share grants access
        repo::vaults::add_share(&pool, vault_id, stranger.id)
            .await
            .unwrap();
        hub.join(
            &pool,
            Uuid::new_v4(),
            "dev",
            stranger.id,
            &VaultId::Int(vault_id),
            "kh",
            tx,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let (pool, owner_id, vault_id) = setup().await;
        let hub = VaultChannels::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let channel = hub
            .join(
                &pool,
                Uuid::new_v4(),
                "a",
                owner_id,
                &VaultId::Int(vault_id),
                "kh",
                tx_a,
            )
            .await
            .unwrap();
        hub.join(
            &pool,
            Uuid::new_v4(),
            "b",
            owner_id,
            &VaultId::Int(vault_id),
            "kh",
            tx_b,
        )
        .await
        .unwrap();

        let record = channel
            .publish(
                &pool,
                NewDocumentRecord {
                    vault_id,
                    path: "a.md".into(),
                    relatedpath: String::new(),
                    hash: "deadbeef".into(),
                    device: "a".into(),
                    folder: false,
                    deleted: false,
                    size: 5,
                    ctime: 1,
                    mtime: 2,
                },
            )
            .await
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerMessage::Push(payload) => assert_eq!(payload.uid, record.id),
                other => panic!("expected push, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn last_leave_drops_the_channel() {
        let (pool, owner_id, vault_id) = setup().await;
        let hub = VaultChannels::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();

        let channel = hub
            .join(
                &pool,
                conn_id,
                "dev",
                owner_id,
                &VaultId::Int(vault_id),
                "kh",
                tx,
            )
            .await
            .unwrap();
        assert_eq!(hub.status().len(), 1);

        hub.leave(&channel, conn_id);
        assert!(hub.status().is_empty());
    }
}
