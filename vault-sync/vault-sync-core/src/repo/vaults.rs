//! Vault rows, access rules, and per-vault aggregates.
//!
//! Access rules: a vault must exist and not be soft-deleted; without a
//! user id the check is existence-only; otherwise the user must own the
//! vault, or hold a share when shared access is allowed.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::{User, Vault};

pub async fn get(
    pool: &SqlitePool,
    vault_id: i64,
    user_id: Option<i64>,
    include_shared: bool,
) -> Result<Option<Vault>> {
    let vault = match user_id {
        None => {
            sqlx::query_as("SELECT * FROM vault WHERE id = ? AND deleted = 0")
                .bind(vault_id)
                .fetch_optional(pool)
                .await?
        }
        Some(user_id) if include_shared => {
            sqlx::query_as(
                "SELECT DISTINCT vault.* FROM vault \
                 LEFT JOIN vault_share ON vault_share.vault_id = vault.id \
                 WHERE vault.id = ?1 AND vault.deleted = 0 \
                   AND (vault.owner_id = ?2 OR vault_share.user_id = ?2)",
            )
            .bind(vault_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
        }
        Some(user_id) => {
            sqlx::query_as("SELECT * FROM vault WHERE id = ? AND deleted = 0 AND owner_id = ?")
                .bind(vault_id)
                .bind(user_id)
                .fetch_optional(pool)
                .await?
        }
    };

    Ok(vault)
}

pub async fn check_access(
    pool: &SqlitePool,
    vault_id: i64,
    user_id: Option<i64>,
    include_shared: bool,
) -> Result<bool> {
    Ok(get(pool, vault_id, user_id, include_shared).await?.is_some())
}

pub async fn create(
    pool: &SqlitePool,
    owner_id: i64,
    name: &str,
    password: &str,
    key_hash: &str,
    salt: &str,
) -> Result<Vault> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO vault (owner_id, name, password, key_hash, salt, deleted, created_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(owner_id)
    .bind(name)
    .bind(password)
    .bind(key_hash)
    .bind(salt)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(Vault {
        id,
        owner_id,
        name: name.to_string(),
        password: password.to_string(),
        key_hash: key_hash.to_string(),
        salt: salt.to_string(),
        deleted: false,
        deleted_at: None,
        created_at: now,
    })
}

/// Soft delete. The purger hard-deletes the vault and its data once
/// `deleted_at` passes the configured age.
pub async fn soft_delete(pool: &SqlitePool, vault_id: i64) -> Result<()> {
    sqlx::query("UPDATE vault SET deleted = 1, deleted_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(vault_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_owned(pool: &SqlitePool, user_id: i64) -> Result<Vec<Vault>> {
    Ok(
        sqlx::query_as("SELECT * FROM vault WHERE owner_id = ? AND deleted = 0 ORDER BY id")
            .bind(user_id)
            .fetch_all(pool)
            .await?,
    )
}

pub async fn list_shared(pool: &SqlitePool, user_id: i64) -> Result<Vec<Vault>> {
    Ok(sqlx::query_as(
        "SELECT vault.* FROM vault JOIN vault_share ON vault_share.vault_id = vault.id \
         WHERE vault_share.user_id = ? AND vault.deleted = 0 ORDER BY vault.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Sum of `size` over every record of the vault, historical revisions
/// included. This is the number reported against the sync size limit.
pub async fn get_size(pool: &SqlitePool, vault_id: i64) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM document_record WHERE vault_id = ?")
            .bind(vault_id)
            .fetch_one(pool)
            .await?,
    )
}

/// How many records of this vault reference the hash. Zero means the
/// blob is not on disk yet and must be uploaded.
pub async fn hash_count(pool: &SqlitePool, vault_id: i64, hash: &str) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM document_record WHERE vault_id = ? AND hash = ?")
            .bind(vault_id)
            .bind(hash)
            .fetch_one(pool)
            .await?,
    )
}

pub async fn list_shares(pool: &SqlitePool, vault_id: i64) -> Result<Vec<User>> {
    Ok(sqlx::query_as(
        "SELECT user.* FROM user JOIN vault_share ON vault_share.user_id = user.id \
         WHERE vault_share.vault_id = ? ORDER BY user.id",
    )
    .bind(vault_id)
    .fetch_all(pool)
    .await?)
}

pub async fn add_share(pool: &SqlitePool, vault_id: i64, user_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO vault_share (vault_id, user_id) VALUES (?, ?) \
         ON CONFLICT (vault_id, user_id) DO NOTHING",
    )
    .bind(vault_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_share(pool: &SqlitePool, vault_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM vault_share WHERE vault_id = ? AND user_id = ?")
        .bind(vault_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
