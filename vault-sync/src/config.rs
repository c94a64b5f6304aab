//! CLI and environment configuration.
//!
//! Every flag can also come from the environment; nested purge keys use
//! the `PURGE__*` spelling (`PURGE__INTERVAL=2`).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use vault_sync_core::purger::PurgeOptions;

#[derive(Debug, Parser)]
#[command(name = "vault-sync", about = "Self-hosted note synchronization server")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server (the default).
    Serve,
    /// Create a user and print its id.
    CreateUser {
        name: String,
        email: String,
        password: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Address to serve HTTP and sync connections on.
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Path of the SQLite database.
    #[arg(long, env = "DATABASE", default_value = "data/data.db")]
    pub database: PathBuf,

    /// Directory blobs are stored under.
    #[arg(long, env = "BLOBS", default_value = "data/blobs")]
    pub blobs: PathBuf,

    /// Verbose database statement logging.
    #[arg(long, env = "ECHO", default_value_t = false, action = ArgAction::Set)]
    pub echo: bool,

    /// Verbose process logging and debug routes.
    #[arg(long, env = "DEBUG", default_value_t = false, action = ArgAction::Set)]
    pub debug: bool,

    /// Enable the background purger.
    #[arg(long, env = "PURGE__ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub purge_enabled: bool,

    /// Hours between purger runs.
    #[arg(long, env = "PURGE__INTERVAL", default_value_t = 1)]
    pub purge_interval: u64,

    /// Days a soft-deleted vault is kept before hard deletion.
    #[arg(long, env = "PURGE__VAULT_AGE", default_value_t = 30)]
    pub purge_vault_age: u64,

    /// Days before an unconfirmed upload is reclaimed.
    #[arg(long, env = "PURGE__PENDING_AGE", default_value_t = 7)]
    pub purge_pending_age: u64,
}

impl Settings {
    pub fn purge_options(&self) -> PurgeOptions {
        PurgeOptions {
            enabled: self.purge_enabled,
            interval: self.purge_interval,
            vault_age: self.purge_vault_age,
            pending_age: self.purge_pending_age,
        }
    }
}
