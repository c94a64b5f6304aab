//! Content-addressed blob store on local disk.
//!
//! Blobs live at `<prefix>/<vault_id>/<hash[0:2]>/<hash[2:4]>/<hash[4:]>`.
//! Readers and writers are plain async file streams; chunking is the
//! caller's concern, and partial writes are left in place for the purger
//! to reclaim via the pending-upload table.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BlobStore {
    prefix: PathBuf,
}

/// Whether a client-supplied hash is safe to use as a blob address:
/// lowercase hex, long enough to split into path segments.
pub fn is_content_hash(hash: &str) -> bool {
    hash.len() > 4 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl BlobStore {
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
        }
    }

    pub fn vault_dir(&self, vault_id: i64) -> PathBuf {
        self.prefix.join(vault_id.to_string())
    }

    /// Resolved on-disk path of a blob. Fails on hashes that cannot
    /// address one, so a bad hash can never panic the path split or
    /// escape the prefix.
    pub fn path_of(&self, vault_id: i64, hash: &str) -> Result<PathBuf> {
        if !is_content_hash(hash) {
            return Err(Error::validation(format!("malformed content hash: {hash}")));
        }
        Ok(self
            .vault_dir(vault_id)
            .join(&hash[..2])
            .join(&hash[2..4])
            .join(&hash[4..]))
    }

    pub async fn open_read(&self, vault_id: i64, hash: &str) -> Result<File> {
        Ok(File::open(self.path_of(vault_id, hash)?).await?)
    }

    /// Opens a blob for writing, creating intermediate directories.
    /// Truncates any previous content at the same address.
    pub async fn open_write(&self, vault_id: i64, hash: &str) -> Result<File> {
        let path = self.path_of(vault_id, hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(File::create(path).await?)
    }

    pub async fn remove(&self, vault_id: i64, hash: &str) -> Result<()> {
        match fs::remove_file(self.path_of(vault_id, hash)?).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Removes every blob of a vault. Missing directories are fine.
    pub async fn remove_vault_dir(&self, vault_id: i64) -> Result<()> {
        match fs::remove_dir_all(self.vault_dir(vault_id)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
