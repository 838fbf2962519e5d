//! Remote blob transport
//!
//! The engine moves bytes through this trait; implementations cover the
//! signer-backed object store ([`http::SignerRemoteStorage`]), a direct
//! worker-proxied endpoint with HMAC-signed URLs ([`proxy::ProxyRemoteStorage`]),
//! and an in-memory fake with failure toggles ([`memory::MemoryRemoteStorage`]).

pub mod http;
pub mod memory;
pub mod proxy;
pub mod signer;

use crate::core::{FileBlob, SyncResult};
use async_trait::async_trait;
use std::sync::Arc;

pub use http::SignerRemoteStorage;
pub use memory::MemoryRemoteStorage;
pub use proxy::ProxyRemoteStorage;
pub use signer::SignerClient;

/// Byte-level progress callback: `(loaded, total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Result of a completed upload.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadOutcome {
    pub key: String,
    pub etag: Option<String>,
}

/// Signer-mediated storage adapter surface.
///
/// Keys are content-addressed (`files/<store_id>/<hash>`); objects are
/// immutable per key, so re-uploading the same key is always safe.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload a blob under `key`, reporting progress when a callback is
    /// given. Content type and length are preserved for round-trip
    /// fidelity.
    async fn upload(
        &self,
        blob: &FileBlob,
        key: &str,
        progress: Option<ProgressFn>,
    ) -> SyncResult<UploadOutcome>;

    /// Download the object at `key`.
    async fn download(&self, key: &str, progress: Option<ProgressFn>) -> SyncResult<FileBlob>;

    /// Delete the object at `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// A URL from which the object can be fetched directly.
    async fn get_download_url(&self, key: &str) -> SyncResult<String>;

    /// `false` on any failure; never errors.
    async fn check_health(&self) -> bool;
}
