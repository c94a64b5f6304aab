//! Error kinds shared by the sync engine and the HTTP surface.
//!
//! Display strings double as the wire-visible `err` payloads, so they
//! stay short and stable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No token supplied at all.
    #[error("Missing token")]
    AuthMissing,

    /// Token unknown, or the user may not touch the vault.
    #[error("Auth failed")]
    AuthDenied,

    #[error("Vault not found")]
    VaultNotFound,

    #[error("Record not found")]
    RecordNotFound,

    /// Vault keyhash mismatch.
    #[error("Invalid password")]
    InvalidKey,

    /// Malformed or out-of-place client message.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Whether this error is a client-facing domain error rather than a
    /// server-side failure.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Error::Database(_) | Error::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
