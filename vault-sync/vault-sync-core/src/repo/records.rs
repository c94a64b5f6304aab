//! The append-only revision log.
//!
//! Record ids come from the database and are strictly monotonic across
//! all vaults; a client's version cursor is simply the highest id it
//! has ingested. "Latest per path" always means max id, never wall
//! clock.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::model::{DocumentRecord, NewDocumentRecord};

/// Appends a record, assigning its id and server timestamp.
pub async fn insert(pool: &SqlitePool, record: NewDocumentRecord) -> Result<DocumentRecord> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO document_record \
         (vault_id, path, relatedpath, hash, device, folder, deleted, size, ctime, mtime, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.vault_id)
    .bind(&record.path)
    .bind(&record.relatedpath)
    .bind(&record.hash)
    .bind(&record.device)
    .bind(record.folder)
    .bind(record.deleted)
    .bind(record.size)
    .bind(record.ctime)
    .bind(record.mtime)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(DocumentRecord {
        id,
        vault_id: record.vault_id,
        path: record.path,
        relatedpath: record.relatedpath,
        hash: record.hash,
        device: record.device,
        folder: record.folder,
        deleted: record.deleted,
        size: record.size,
        ctime: record.ctime,
        mtime: record.mtime,
        created_at: now,
    })
}

pub async fn get(pool: &SqlitePool, vault_id: i64, id: i64) -> Result<Option<DocumentRecord>> {
    Ok(
        sqlx::query_as("SELECT * FROM document_record WHERE vault_id = ? AND id = ?")
            .bind(vault_id)
            .bind(id)
            .fetch_optional(pool)
            .await?,
    )
}

/// Paths whose latest record is a deletion, one record per path,
/// ascending by id.
pub async fn get_deleted(pool: &SqlitePool, vault_id: i64) -> Result<Vec<DocumentRecord>> {
    Ok(sqlx::query_as(
        "SELECT * FROM document_record \
         WHERE vault_id = ?1 \
           AND id IN (SELECT MAX(id) FROM document_record WHERE vault_id = ?1 GROUP BY path) \
           AND deleted = 1 \
         ORDER BY id",
    )
    .bind(vault_id)
    .fetch_all(pool)
    .await?)
}

/// Revision history of one path, newest first. `last = 0` means no
/// upper bound; otherwise only records with `id < last` are returned.
pub async fn get_history(
    pool: &SqlitePool,
    vault_id: i64,
    path: &str,
    last: i64,
) -> Result<Vec<DocumentRecord>> {
    Ok(sqlx::query_as(
        "SELECT * FROM document_record \
         WHERE vault_id = ?1 AND path = ?2 AND (?3 = 0 OR id < ?3) \
         ORDER BY id DESC",
    )
    .bind(vault_id)
    .bind(path)
    .bind(last)
    .fetch_all(pool)
    .await?)
}

/// Catch-up query: the latest record per path among records newer than
/// the client's cursor, in causal (ascending id) order, plus the new
/// cursor value the client must store.
///
/// With `initial` set, paths whose latest state is a deletion are
/// skipped; a fresh device has nothing to delete.
pub async fn get_updates(
    pool: &SqlitePool,
    vault_id: i64,
    last: i64,
    initial: bool,
) -> Result<(i64, Vec<DocumentRecord>)> {
    let max_id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM document_record WHERE vault_id = ?")
        .bind(vault_id)
        .fetch_one(pool)
        .await?;
    let max_id = max_id.unwrap_or(0);

    if last == max_id {
        return Ok((max_id, Vec::new()));
    }
    if last > max_id {
        return Err(Error::validation(format!(
            "version cursor {last} is ahead of vault (latest {max_id})"
        )));
    }

    let sql = if initial {
        "SELECT * FROM document_record \
         WHERE vault_id = ?1 \
           AND id IN (SELECT MAX(id) FROM document_record \
                      WHERE vault_id = ?1 AND id > ?2 GROUP BY path) \
           AND deleted = 0 \
         ORDER BY id"
    } else {
        "SELECT * FROM document_record \
         WHERE vault_id = ?1 \
           AND id IN (SELECT MAX(id) FROM document_record \
                      WHERE vault_id = ?1 AND id > ?2 GROUP BY path) \
         ORDER BY id"
    };

    let records = sqlx::query_as(sql)
        .bind(vault_id)
        .bind(last)
        .fetch_all(pool)
        .await?;

    Ok((max_id, records))
}
