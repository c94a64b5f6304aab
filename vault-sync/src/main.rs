use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vault_sync::api;
use vault_sync::config::{Cli, Command, Settings};
use vault_sync_core::purger::Purger;
use vault_sync_core::storage::BlobStore;
use vault_sync_core::{db, repo};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.settings.debug {
        "vault_sync=debug,vault_sync_core=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(parent) = cli.settings.database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::connect(&cli.settings.database, cli.settings.echo).await?;
    db::migrate(&pool).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::CreateUser {
            name,
            email,
            password,
        } => {
            let user = repo::users::create(&pool, &name, &email, &password).await?;
            println!("User created, uid: {}.", user.id);
            Ok(())
        }
        Command::Serve => serve(pool, cli.settings).await,
    }
}

async fn serve(pool: sqlx::SqlitePool, settings: Settings) -> Result<()> {
    let store = BlobStore::new(&settings.blobs);

    let purger = if settings.purge_enabled {
        let mut purger = Purger::new(pool.clone(), store.clone(), settings.purge_options());
        purger.start();
        Some(purger)
    } else {
        None
    };

    let state = api::AppState::new(pool, store, settings.clone());
    let app = api::router(state);

    let listener = TcpListener::bind(settings.listen).await?;
    info!(addr = %settings.listen, "listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(purger) = purger {
        purger.stop().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
