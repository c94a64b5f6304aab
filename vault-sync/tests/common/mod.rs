//! Shared fixtures: a server on an ephemeral port plus seeded rows.

use std::future::IntoFuture;
use std::net::SocketAddr;

use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::net::TcpListener;
use vault_sync::api::{self, AppState};
use vault_sync::config::Settings;
use vault_sync_core::storage::BlobStore;
use vault_sync_core::{db, repo};

/// Keyhash stored on seeded vaults; the server only ever compares it
/// for equality, so any opaque string works.
pub const KEYHASH: &str = "deadbeefkeyhash";

pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: SqlitePool,
    pub store: BlobStore,
    _dir: TempDir,
}

pub struct Account {
    pub user_id: i64,
    pub token: String,
    pub vault_id: i64,
}

pub async fn spawn() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("data.db");
    let blobs = dir.path().join("blobs");

    let pool = db::connect(&database, false).await.unwrap();
    db::migrate(&pool).await.unwrap();
    let store = BlobStore::new(&blobs);

    let settings = Settings {
        listen: "127.0.0.1:0".parse().unwrap(),
        database,
        blobs,
        echo: false,
        debug: true,
        purge_enabled: false,
        purge_interval: 1,
        purge_vault_age: 30,
        purge_pending_age: 7,
    };

    let state = AppState::new(pool.clone(), store.clone(), settings);
    let app = api::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());

    TestApp {
        addr,
        pool,
        store,
        _dir: dir,
    }
}

pub async fn seed_account(pool: &SqlitePool) -> Account {
    seed_account_with(pool, "tester@example.com").await
}

pub async fn seed_account_with(pool: &SqlitePool, email: &str) -> Account {
    let user = repo::users::create(pool, "tester", email, "hunter2")
        .await
        .unwrap();
    let token = repo::users::create_token(pool, user.id).await.unwrap();
    let vault = repo::vaults::create(pool, user.id, "notes", "", KEYHASH, "salt")
        .await
        .unwrap();

    Account {
        user_id: user.id,
        token,
        vault_id: vault.id,
    }
}
