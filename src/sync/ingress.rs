//! File storage API (ingress)
//!
//! Accepts new and updated files, hashes them, writes them into local
//! content-addressed storage, commits the log events, and marks the
//! per-session state so the reconciler uploads in the background. Because
//! `id = content_hash`, re-saving identical bytes lands on the same row.

use crate::core::{
    now_millis, paths, sha256_hex, FileBlob, LocalFileState, SaveFileResult, SyncError, SyncResult,
};
use crate::storage::LocalBlobStore;
use crate::store::{Store, StoreEvent, StoreExt};
use crate::sync::executor::SyncExecutor;
use crate::sync::reconciler::Reconciler;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Async ingress transform. Returning the *same* `Arc` signals "no change,
/// don't recompress" - image encoders use this to avoid repeated lossy
/// re-encoding on updates.
pub type PreprocessorFn =
    Arc<dyn Fn(Arc<FileBlob>) -> BoxFuture<'static, SyncResult<Arc<FileBlob>>> + Send + Sync>;

/// MIME-pattern routed preprocessors.
///
/// Matching priority: exact type, then `type/*`, then `*/*` or `*`.
#[derive(Clone, Default)]
pub struct PreprocessorMap {
    entries: Vec<(String, PreprocessorFn)>,
}

impl PreprocessorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F, Fut>(&mut self, pattern: impl Into<String>, preprocessor: F)
    where
        F: Fn(Arc<FileBlob>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = SyncResult<Arc<FileBlob>>> + Send + 'static,
    {
        let wrapped: PreprocessorFn = Arc::new(
            move |blob| -> BoxFuture<'static, SyncResult<Arc<FileBlob>>> {
                Box::pin(preprocessor(blob))
            },
        );
        self.entries.push((pattern.into(), wrapped));
    }

    /// Register an already-boxed preprocessor.
    pub fn insert_boxed(&mut self, pattern: impl Into<String>, preprocessor: PreprocessorFn) {
        self.entries.push((pattern.into(), preprocessor));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, mime_type: &str) -> Option<&PreprocessorFn> {
        // Exact match wins
        if let Some((_, p)) = self.entries.iter().find(|(pattern, _)| pattern == mime_type) {
            return Some(p);
        }
        // Then type/*
        let family = mime_type.split('/').next().unwrap_or(mime_type);
        let family_pattern = format!("{family}/*");
        if let Some((_, p)) = self
            .entries
            .iter()
            .find(|(pattern, _)| *pattern == family_pattern)
        {
            return Some(p);
        }
        // Then the catch-alls
        self.entries
            .iter()
            .find(|(pattern, _)| pattern == "*/*" || pattern == "*")
            .map(|(_, p)| p)
    }

    /// Run the matching preprocessor, if any. Callers compare the returned
    /// `Arc` against the input to detect the "unchanged" signal.
    pub async fn apply(&self, blob: Arc<FileBlob>) -> SyncResult<Arc<FileBlob>> {
        match self.find(&blob.mime_type) {
            Some(preprocessor) => preprocessor(blob).await,
            None => Ok(blob),
        }
    }
}

pub struct FileStorage {
    store: Arc<dyn Store>,
    blobs: Arc<LocalBlobStore>,
    reconciler: Arc<Reconciler>,
    executor: Arc<SyncExecutor>,
    preprocessors: PreprocessorMap,
    store_id: String,
}

impl FileStorage {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<LocalBlobStore>,
        reconciler: Arc<Reconciler>,
        executor: Arc<SyncExecutor>,
        preprocessors: PreprocessorMap,
    ) -> Self {
        let store_id = reconciler.store_id().to_string();
        Self {
            store,
            blobs,
            reconciler,
            executor,
            preprocessors,
            store_id,
        }
    }

    /// Ingest a new file: preprocess, hash, write locally, commit
    /// `FileCreated`, mark the session state, enqueue the upload.
    ///
    /// Saving bytes that hash to an existing id is a no-op re-create: the
    /// same result is returned and no duplicate row is produced.
    pub async fn save_file(&self, blob: FileBlob) -> SyncResult<SaveFileResult> {
        let blob = self.preprocessors.apply(Arc::new(blob)).await?;
        let content_hash = sha256_hex(&blob.bytes);
        let path = paths::blob_path(&self.store_id, &content_hash);
        let now = now_millis();

        self.blobs.write_file(&path, &blob.bytes).await?;
        self.store
            .commit(StoreEvent::FileCreated {
                id: content_hash.clone(),
                path: path.clone(),
                content_hash: content_hash.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        // Skip the state reset when this id already converged; a repeated
        // save must not re-trigger an upload.
        let doc = self.store.local_file_state().await?;
        let already_known = doc
            .local_files
            .get(&content_hash)
            .is_some_and(|entry| entry.local_hash == content_hash);
        if !already_known {
            self.reconciler
                .set_local_state(&content_hash, LocalFileState::locally_written(&path, &content_hash))
                .await?;
            self.executor.enqueue_upload(&content_hash);
        }

        tracing::info!(file_id = %content_hash, path = %path, size = blob.len(), "File saved");
        Ok(SaveFileResult {
            file_id: content_hash.clone(),
            path,
            content_hash,
        })
    }

    /// Replace a file's bytes. An unchanged hash short-circuits; otherwise
    /// the new blob is written, `FileUpdated` clears the remote key so the
    /// reconciler re-uploads, and the old local blob is removed
    /// best-effort.
    pub async fn update_file(&self, file_id: &str, blob: FileBlob) -> SyncResult<SaveFileResult> {
        let row = self
            .store
            .file_by_id(file_id)
            .await?
            .ok_or_else(|| SyncError::UnknownFile {
                file_id: file_id.to_string(),
            })?;
        if row.is_deleted() {
            return Err(SyncError::UnknownFile {
                file_id: file_id.to_string(),
            });
        }

        let processed = self.preprocessors.apply(Arc::new(blob)).await?;

        // An unchanged hash means nothing to commit. This also covers the
        // preprocessor handing back its input `Arc` untouched on a file
        // whose stored bytes already match.
        let content_hash = sha256_hex(&processed.bytes);
        if content_hash == row.content_hash {
            return Ok(SaveFileResult {
                file_id: row.id.clone(),
                path: row.path.clone(),
                content_hash,
            });
        }

        let new_path = paths::blob_path(&self.store_id, &content_hash);
        self.blobs.write_file(&new_path, &processed.bytes).await?;
        self.store
            .commit(StoreEvent::FileUpdated {
                id: row.id.clone(),
                path: new_path.clone(),
                remote_key: String::new(),
                content_hash: content_hash.clone(),
                updated_at: now_millis(),
            })
            .await?;
        self.reconciler
            .set_local_state(
                &row.id,
                LocalFileState::locally_written(&new_path, &content_hash),
            )
            .await?;

        if let Err(error) = self.blobs.delete_file(&row.path).await {
            if !matches!(error, SyncError::FileNotFound { .. }) {
                tracing::warn!(path = %row.path, error = %error, "Old blob removal failed");
            }
        }
        // The object under the previous hash is orphaned now; removal is
        // best-effort since the new upload does not depend on it.
        if let Some(old_key) = &row.remote_key {
            if let Err(error) = self.reconciler.delete_remote_object(old_key).await {
                tracing::warn!(key = %old_key, error = %error, "Orphaned remote object removal failed");
            }
        }

        self.executor.enqueue_upload(&row.id);
        tracing::info!(file_id = %row.id, path = %new_path, "File updated");
        Ok(SaveFileResult {
            file_id: row.id.clone(),
            path: new_path,
            content_hash,
        })
    }

    /// Delete a file: commit the tombstone, then run the deletion race
    /// protocol (local removal, remote removal once no upload is running).
    pub async fn delete_file(&self, file_id: &str) -> SyncResult<()> {
        let row = self
            .store
            .file_by_id(file_id)
            .await?
            .ok_or_else(|| SyncError::UnknownFile {
                file_id: file_id.to_string(),
            })?;
        if row.is_deleted() {
            return Ok(());
        }

        self.store
            .commit(StoreEvent::FileDeleted {
                id: row.id.clone(),
                deleted_at: now_millis(),
            })
            .await?;
        // Remote cleanup may be deferred (offline, or an upload in flight);
        // the reconciler retries it, so the delete itself succeeds now.
        if let Err(error) = self.reconciler.on_file_deleted(file_id).await {
            tracing::warn!(file_id = %file_id, error = %error, "Remote cleanup deferred");
        }
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.blobs.read_file(path).await
    }

    pub async fn get_file_url(&self, path: &str) -> SyncResult<String> {
        self.blobs.get_file_url(path).await
    }

    /// URL for a file id: the local blob when present, else a signed
    /// download URL for the remote object while the bytes are still on
    /// their way down.
    pub async fn resolve_file_url(&self, file_id: &str) -> SyncResult<String> {
        let row = self
            .store
            .file_by_id(file_id)
            .await?
            .ok_or_else(|| SyncError::UnknownFile {
                file_id: file_id.to_string(),
            })?;
        if row.is_deleted() {
            return Err(SyncError::UnknownFile {
                file_id: file_id.to_string(),
            });
        }

        match self.blobs.get_file_url(&row.path).await {
            Ok(url) => Ok(url),
            Err(SyncError::FileNotFound { .. }) => match &row.remote_key {
                Some(key) => self.reconciler.remote_download_url(key).await,
                None => Err(SyncError::FileNotFound {
                    path: row.path.clone(),
                }),
            },
            Err(error) => Err(error),
        }
    }
}
