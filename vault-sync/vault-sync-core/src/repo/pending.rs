//! Pending-upload bookkeeping.
//!
//! A row is written when a blob upload begins and removed when the
//! referencing record commits; rows that outlive their age limit mark
//! abandoned uploads for the purger to reclaim.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::PendingKind;

/// Marks an upload as in flight. Idempotent per `(vault_id, hash)`.
pub async fn insert(pool: &SqlitePool, vault_id: i64, hash: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_file (vault_id, hash, kind, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT (vault_id, hash) DO NOTHING",
    )
    .bind(vault_id)
    .bind(hash)
    .bind(PendingKind::Upload)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove(pool: &SqlitePool, vault_id: i64, hash: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_file WHERE vault_id = ? AND hash = ?")
        .bind(vault_id)
        .bind(hash)
        .execute(pool)
        .await?;
    Ok(())
}
