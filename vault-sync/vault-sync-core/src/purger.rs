//! Background reclamation of soft-deleted vaults and abandoned uploads.
//!
//! One long-lived task sleeps for `interval` hours, then runs a purge
//! pass. Each deleted vault is cleared inside its own writer-exclusive
//! transaction so other writers are never blocked for more than one
//! vault's worth of deletes. Cancellation lands between iterations: a
//! purge pass that already started runs to completion.

use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{PendingFile, Vault};
use crate::storage::BlobStore;

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub enabled: bool,
    /// Hours between purge passes.
    pub interval: u64,
    /// Days a soft-deleted vault is kept before hard deletion.
    pub vault_age: u64,
    /// Days before an unconfirmed upload counts as abandoned.
    pub pending_age: u64,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 1,
            vault_age: 30,
            pending_age: 7,
        }
    }
}

pub struct Purger {
    pool: SqlitePool,
    store: BlobStore,
    options: PurgeOptions,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Purger {
    pub fn new(pool: SqlitePool, store: BlobStore, options: PurgeOptions) -> Self {
        Self {
            pool,
            store,
            options,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn start(&mut self) {
        let pool = self.pool.clone();
        let store = self.store.clone();
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(run(pool, store, options, cancel));
        self.task = Some(tokio::spawn(fut));
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            info!("waiting for purger task to stop");
            let _ = task.await;
        }
    }
}

async fn run(pool: SqlitePool, store: BlobStore, options: PurgeOptions, cancel: CancellationToken) {
    let interval = time::Duration::from_secs(options.interval * 60 * 60);

    loop {
        info!(hours = options.interval, "next purge scheduled");
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("purger task cancelled");
                return;
            }
            _ = time::sleep(interval) => {}
        }

        info!("purging");
        if let Err(err) = Box::pin(purge(&pool, &store, &options)).await {
            error!(error = %err, "purge pass failed");
        }
    }
}

/// One purge pass: hard-delete aged-out vaults, reclaim abandoned
/// uploads, then give storage back with a VACUUM.
pub async fn purge(pool: &SqlitePool, store: &BlobStore, options: &PurgeOptions) -> Result<()> {
    let mut conn = pool.acquire().await?;

    let cutoff = Utc::now() - Duration::days(options.vault_age as i64);
    let vaults: Vec<Vault> = sqlx::query_as(
        "SELECT * FROM vault WHERE deleted = 1 AND (deleted_at IS NULL OR deleted_at <= ?)",
    )
    .bind(cutoff)
    .fetch_all(&mut *conn)
    .await?;

    for vault in vaults {
        if let Err(err) = Box::pin(purge_vault(&mut conn, store, &vault)).await {
            error!(vault_id = vault.id, error = %err, "vault purge failed");
        }
    }

    let cutoff = Utc::now() - Duration::days(options.pending_age as i64);
    let stale: Vec<PendingFile> = sqlx::query_as(
        "SELECT * FROM pending_file WHERE kind = 'upload' AND created_at <= ? ORDER BY id",
    )
    .bind(cutoff)
    .fetch_all(&mut *conn)
    .await?;

    for pending in stale {
        debug!(
            vault_id = pending.vault_id,
            hash = %pending.hash,
            "reclaiming abandoned upload"
        );
        if let Err(err) = store.remove(pending.vault_id, &pending.hash).await {
            warn!(
                vault_id = pending.vault_id,
                hash = %pending.hash,
                error = %err,
                "stale blob removal failed"
            );
        }
        sqlx::query("DELETE FROM pending_file WHERE id = ?")
            .bind(pending.id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("VACUUM").execute(&mut *conn).await?;
    Ok(())
}

async fn purge_vault(conn: &mut SqliteConnection, store: &BlobStore, vault: &Vault) -> Result<()> {
    debug!(vault_id = vault.id, name = %vault.name, "purging deleted vault");

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    match purge_vault_rows(conn, store, vault).await {
        Ok(()) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(())
        }
        Err(err) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(err)
        }
    }
}

async fn purge_vault_rows(
    conn: &mut SqliteConnection,
    store: &BlobStore,
    vault: &Vault,
) -> Result<()> {
    sqlx::query("DELETE FROM pending_file WHERE vault_id = ?")
        .bind(vault.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM vault_share WHERE vault_id = ?")
        .bind(vault.id)
        .execute(&mut *conn)
        .await?;

    // best-effort: a half-removed directory is retried next pass
    if let Err(err) = store.remove_vault_dir(vault.id).await {
        warn!(vault_id = vault.id, error = %err, "blob directory removal failed");
    }

    sqlx::query("DELETE FROM document_record WHERE vault_id = ?")
        .bind(vault.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM vault WHERE id = ?")
        .bind(vault.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
