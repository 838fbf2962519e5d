//! In-memory remote storage for tests
//!
//! Same surface as the HTTP adapters, with failure toggles and a gate that
//! holds uploads in flight until released, used to exercise the deletion
//! race against a blocked upload.

use crate::core::{paths, FileBlob, SyncError, SyncResult};
use crate::remote::{ProgressFn, RemoteStorage, UploadOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
pub struct MemoryRemoteStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    offline: AtomicBool,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    hold_uploads: AtomicBool,
    hold_released: Notify,
    upload_attempts: AtomicU64,
    download_attempts: AtomicU64,
    base_url: Mutex<String>,
}

impl MemoryRemoteStorage {
    pub fn new() -> Self {
        let remote = Self::default();
        *remote.base_url.lock().unwrap_or_else(|e| e.into_inner()) =
            "memory://remote".to_string();
        remote
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        *self.base_url.lock().unwrap_or_else(|e| e.into_inner()) = base_url.into();
        self
    }

    // ----- toggles -----

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// While set, uploads block after their attempt is counted until
    /// [`release_uploads`](Self::release_uploads) is called.
    pub fn set_hold_uploads(&self, hold: bool) {
        self.hold_uploads.store(hold, Ordering::SeqCst);
        if !hold {
            self.hold_released.notify_waiters();
        }
    }

    pub fn release_uploads(&self) {
        self.set_hold_uploads(false);
    }

    // ----- introspection -----

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn object_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.bytes.clone())
    }

    pub fn upload_attempts(&self) -> u64 {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn download_attempts(&self) -> u64 {
        self.download_attempts.load(Ordering::SeqCst)
    }

    /// Seed an object directly, bypassing the toggles.
    pub fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
    }

    fn check_online(&self, key: &str, kind: &str) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            let cause = "remote is offline".to_string();
            return Err(match kind {
                "upload" => SyncError::Upload {
                    key: key.to_string(),
                    cause,
                },
                "download" => SyncError::Download {
                    key: key.to_string(),
                    cause,
                },
                _ => SyncError::Delete {
                    key: key.to_string(),
                    cause,
                },
            });
        }
        Ok(())
    }

    async fn wait_if_held(&self) {
        loop {
            let released = self.hold_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.hold_uploads.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemoteStorage {
    async fn upload(
        &self,
        blob: &FileBlob,
        key: &str,
        progress: Option<ProgressFn>,
    ) -> SyncResult<UploadOutcome> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online(key, "upload")?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(SyncError::Upload {
                key: key.to_string(),
                cause: "injected upload failure".to_string(),
            });
        }

        self.wait_if_held().await;

        let total = blob.len() as u64;
        if let Some(cb) = &progress {
            cb(0, total);
            cb(total, total);
        }

        self.put_object(key, blob.bytes.to_vec(), &blob.mime_type);
        Ok(UploadOutcome {
            key: key.to_string(),
            etag: Some(crate::core::sha256_hex(&blob.bytes)),
        })
    }

    async fn download(&self, key: &str, progress: Option<ProgressFn>) -> SyncResult<FileBlob> {
        self.download_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online(key, "download")?;
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(SyncError::Download {
                key: key.to_string(),
                cause: "injected download failure".to_string(),
            });
        }

        let object = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::Download {
                key: key.to_string(),
                cause: "no such object".to_string(),
            })?;

        let total = object.bytes.len() as u64;
        if let Some(cb) = &progress {
            cb(0, total);
            cb(total, total);
        }

        Ok(FileBlob::new(
            paths::file_name(key),
            object.content_type.clone(),
            object.bytes,
        ))
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.check_online(key, "delete")?;
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn get_download_url(&self, key: &str) -> SyncResult<String> {
        let base = self
            .base_url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(format!("{base}/{key}"))
    }

    async fn check_health(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
