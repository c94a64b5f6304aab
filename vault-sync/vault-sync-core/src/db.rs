//! SQLite pool setup and forward-only schema migrations.
//!
//! Revisions are tracked as a monotonic integer in the `db_version`
//! table. Each entry in [`MIGRATIONS`] moves the schema one step
//! forward inside its own transaction; there is no way back.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection, SqlitePool};
use tracing::info;

use crate::error::Result;

const SCHEMA_V1: &str = r#"
CREATE TABLE user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    salt TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE user_token (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES user (id),
    token TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_user_token_token ON user_token (token);
CREATE INDEX idx_user_token_user ON user_token (user_id);

CREATE TABLE vault (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES user (id),
    name TEXT NOT NULL,
    password TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    salt TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_vault_owner ON vault (owner_id);

CREATE TABLE vault_share (
    vault_id INTEGER NOT NULL REFERENCES vault (id),
    user_id INTEGER NOT NULL REFERENCES user (id),
    PRIMARY KEY (vault_id, user_id)
);

CREATE TABLE document_record (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vault_id INTEGER NOT NULL REFERENCES vault (id),
    path TEXT NOT NULL,
    hash TEXT NOT NULL,
    device TEXT NOT NULL,
    folder INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    ctime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_document_record_vault ON document_record (vault_id);
CREATE INDEX idx_document_record_path ON document_record (path);
CREATE INDEX idx_document_record_hash ON document_record (hash);
"#;

const SCHEMA_V2: &str = r#"
ALTER TABLE document_record ADD COLUMN relatedpath TEXT NOT NULL DEFAULT '';
CREATE INDEX idx_document_record_relatedpath ON document_record (relatedpath);
"#;

const SCHEMA_V3: &str = r#"
CREATE TABLE pending_file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vault_id INTEGER NOT NULL REFERENCES vault (id),
    hash TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'upload',
    created_at TEXT NOT NULL,
    UNIQUE (vault_id, hash)
);

ALTER TABLE vault ADD COLUMN deleted_at TEXT;
"#;

const MIGRATIONS: &[&str] = &[SCHEMA_V1, SCHEMA_V2, SCHEMA_V3];

/// Opens (and creates if missing) the database at `path`.
///
/// `echo` keeps sqlx statement logging on; otherwise statements are
/// silenced and only errors surface.
pub async fn connect(path: impl AsRef<Path>, echo: bool) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    if !echo {
        options = options.disable_statement_logging();
    }

    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

/// In-memory database for tests and throwaway runs. Single connection:
/// every handle must see the same memory store.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?)
}

/// Applies every migration past the recorded version, in order.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::raw_sql("CREATE TABLE IF NOT EXISTS db_version (version INTEGER NOT NULL)")
        .execute(&mut *conn)
        .await?;

    let mut version: i64 = match sqlx::query_scalar("SELECT version FROM db_version")
        .fetch_optional(&mut *conn)
        .await?
    {
        Some(version) => version,
        None => {
            sqlx::query("INSERT INTO db_version (version) VALUES (0)")
                .execute(&mut *conn)
                .await?;
            0
        }
    };

    while (version as usize) < MIGRATIONS.len() {
        info!(from = version, "running migration");

        let mut tx = conn.begin().await?;
        sqlx::raw_sql(MIGRATIONS[version as usize])
            .execute(&mut *tx)
            .await?;
        version += 1;
        sqlx::query("UPDATE db_version SET version = ?")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
