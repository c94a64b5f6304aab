//! Row types for the SQLite schema.
//!
//! `DocumentRecord` rows are append-only: once inserted they are never
//! mutated, and the latest record per `(vault_id, path)` is the current
//! state of that path.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Hex-encoded scrypt hash of the account password.
    pub password: String,
    pub salt: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Vault {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// Client-supplied vault password blob; opaque to the server.
    pub password: String,
    /// Equality token the sync handshake checks in constant time.
    pub key_hash: String,
    pub salt: String,
    pub deleted: bool,
    /// Set on soft delete; the purger hard-deletes once this is old enough.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VaultShare {
    pub vault_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRecord {
    pub id: i64,
    pub vault_id: i64,
    pub path: String,
    /// Rename hint; empty when unused.
    pub relatedpath: String,
    /// Lowercase hex content address of the blob; unused for folders
    /// and deletions.
    pub hash: String,
    pub device: String,
    pub folder: bool,
    pub deleted: bool,
    pub size: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub created_at: DateTime<Utc>,
}

/// A `DocumentRecord` before the server assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewDocumentRecord {
    pub vault_id: i64,
    pub path: String,
    pub relatedpath: String,
    pub hash: String,
    pub device: String,
    pub folder: bool,
    pub deleted: bool,
    pub size: i64,
    pub ctime: i64,
    pub mtime: i64,
}

/// Why a `pending_file` row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum PendingKind {
    Upload,
}

/// A blob upload not yet confirmed by a committed `DocumentRecord`.
#[derive(Debug, Clone, FromRow)]
pub struct PendingFile {
    pub id: i64,
    pub vault_id: i64,
    pub hash: String,
    pub kind: PendingKind,
    pub created_at: DateTime<Utc>,
}
