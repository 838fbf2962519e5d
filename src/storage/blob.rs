//! Local content-addressed blob store
//!
//! A thin file-oriented layer over the filesystem capability set. Callers
//! hand in normalized engine paths (`files/<sid>/<hash>`); a missing blob
//! surfaces as `FileNotFound` so callers can treat it as "not downloaded
//! yet" rather than corruption.

use crate::core::{paths, SyncError, SyncResult};
use crate::fs::{FileStat, FileSystem};
use std::sync::{Arc, Mutex};

pub struct LocalBlobStore {
    fs: Arc<dyn FileSystem>,
    minted_urls: Mutex<Vec<String>>,
}

impl LocalBlobStore {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            minted_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Write bytes at `path`, creating parent directories. Atomic at file
    /// granularity via the fs adapter.
    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> SyncResult<()> {
        let path = paths::normalize(path)?;
        self.fs.write_file(&path, bytes).await?;
        tracing::debug!(path = %path, size = bytes.len(), "Blob written");
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        let path = paths::normalize(path)?;
        self.fs.read_file(&path).await
    }

    pub async fn file_exists(&self, path: &str) -> SyncResult<bool> {
        let path = paths::normalize(path)?;
        self.fs.exists(&path).await
    }

    pub async fn delete_file(&self, path: &str) -> SyncResult<()> {
        let path = paths::normalize(path)?;
        self.fs.remove(&path).await?;
        tracing::debug!(path = %path, "Blob deleted");
        Ok(())
    }

    pub async fn stat(&self, path: &str) -> SyncResult<FileStat> {
        let path = paths::normalize(path)?;
        self.fs.stat(&path).await
    }

    /// Mint an opaque URL the host can use as an image/download source.
    /// Minted URLs are tracked so `dispose` can revoke them.
    pub async fn get_file_url(&self, path: &str) -> SyncResult<String> {
        let path = paths::normalize(path)?;
        if !self.fs.exists(&path).await? {
            return Err(SyncError::FileNotFound { path });
        }
        let url = self
            .fs
            .file_url(&path)
            .ok_or_else(|| SyncError::fs("getFileUrl", &path, "adapter cannot mint URLs"))?;
        self.minted_urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());
        Ok(url)
    }

    /// Names of entries directly under `dir`; an absent directory lists as
    /// empty rather than erroring.
    pub async fn list_files(&self, dir: &str) -> SyncResult<Vec<String>> {
        let dir = paths::normalize(dir)?;
        match self.fs.read_directory(&dir).await {
            Ok(names) => Ok(names),
            Err(SyncError::FileNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_directory(&self, path: &str) -> SyncResult<()> {
        let path = paths::normalize(path)?;
        self.fs.make_directory(&path).await
    }

    /// Revoke every URL minted so far. Adapters whose URLs are plain URIs
    /// have nothing to release; the ledger is cleared regardless.
    pub fn revoke_urls(&self) -> usize {
        let mut urls = self.minted_urls.lock().unwrap_or_else(|e| e.into_inner());
        let revoked = urls.len();
        if revoked > 0 {
            tracing::debug!(count = revoked, "Revoked minted blob URLs");
        }
        urls.clear();
        revoked
    }
}
