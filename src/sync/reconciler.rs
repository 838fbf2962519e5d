//! Reconciler
//!
//! Watches the `files` view and drives every row toward convergence: local
//! bytes, remote object, and per-session state all agreeing on the row's
//! content hash. Classification is a pure pass over the current snapshot;
//! repeated runs with the same inputs produce the same patch and the same
//! queue contents (modulo executor dedup). Also owns the deletion race
//! protocol: deletes never cancel in-flight uploads, a post-upload cleanup
//! removes the remote object as soon as the racing upload completes.

use crate::config::{HashMismatchPolicy, SyncOptions};
use crate::core::{
    now_millis, paths, sha256_hex, EventBus, FileRecord, LocalFileState, SyncError, SyncEvent,
    SyncResult, TransferStatus,
};
use crate::remote::{ProgressFn, RemoteStorage};
use crate::storage::LocalBlobStore;
use crate::store::{Store, StoreEvent, StoreExt};
use crate::sync::executor::{SyncExecutor, TransferHandler, TransferKind, TransferStateView};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

pub struct Reconciler {
    store: Arc<dyn Store>,
    blobs: Arc<LocalBlobStore>,
    remote: Arc<dyn RemoteStorage>,
    events: EventBus,
    store_id: String,
    options: SyncOptions,
    executor: OnceLock<Arc<SyncExecutor>>,
    /// File ids with an upload handler currently running.
    inflight_uploads: Mutex<HashSet<String>>,
    /// Deferred remote deletes keyed by file id -> remote key.
    pending_remote_deletes: Mutex<HashMap<String, String>>,
    online: AtomicBool,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<LocalBlobStore>,
        remote: Arc<dyn RemoteStorage>,
        events: EventBus,
        store_id: impl Into<String>,
        options: SyncOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            blobs,
            remote,
            events,
            store_id: paths::sanitize_store_id(&store_id.into()),
            options,
            executor: OnceLock::new(),
            inflight_uploads: Mutex::new(HashSet::new()),
            pending_remote_deletes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        })
    }

    /// Wire the executor after construction; the executor in turn holds
    /// this reconciler as its handler.
    pub fn attach_executor(&self, executor: Arc<SyncExecutor>) {
        let _ = self.executor.set(executor);
    }

    fn executor(&self) -> SyncResult<&Arc<SyncExecutor>> {
        self.executor.get().ok_or(SyncError::NotInitialized)
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Pause or resume transfers on connectivity transitions. Coming back
    /// online re-examines error-state files.
    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return Ok(());
        }
        let executor = self.executor()?;
        if online {
            tracing::info!("Connectivity restored");
            executor.resume();
            self.events.emit(SyncEvent::Online);
            executor.retry_errors().await;
            self.reconcile().await?;
        } else {
            tracing::info!("Connectivity lost, pausing transfers");
            executor.pause();
            self.events.emit(SyncEvent::Offline);
        }
        Ok(())
    }

    /// One classification pass: read the current snapshot, compute the full
    /// desired `localFileState` patch, commit it, (re)queue missing work,
    /// and run deletion cleanups for observed tombstones.
    pub async fn reconcile(&self) -> SyncResult<()> {
        let files = self.store.all_files().await?;
        let mut doc = self.store.local_file_state().await?;
        let mut changed = false;
        let mut to_download: Vec<String> = Vec::new();
        let mut to_upload: Vec<String> = Vec::new();
        let mut to_cleanup: Vec<String> = Vec::new();

        for row in &files {
            if row.is_deleted() {
                if self.needs_deletion_cleanup(&doc.local_files, &row.id) {
                    to_cleanup.push(row.id.clone());
                }
                continue;
            }

            match doc.local_files.entry(row.id.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    // First observation of this row in this session.
                    if row.remote_key.is_some() {
                        slot.insert(LocalFileState::awaiting_download(&row.path));
                        to_download.push(row.id.clone());
                    } else {
                        slot.insert(LocalFileState::awaiting_writer(&row.path));
                    }
                    changed = true;
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    if entry.local_hash == row.content_hash {
                        if row.remote_key.is_none() {
                            // Fresh local bytes, nothing remote: upload.
                            match entry.upload_status {
                                TransferStatus::InProgress | TransferStatus::Error => {}
                                TransferStatus::Pending
                                | TransferStatus::Queued
                                | TransferStatus::Done => {
                                    if entry.upload_status != TransferStatus::Pending
                                        && entry.upload_status != TransferStatus::Queued
                                    {
                                        entry.upload_status = TransferStatus::Pending;
                                        changed = true;
                                    }
                                    to_upload.push(row.id.clone());
                                }
                            }
                        } else {
                            // Converged; normalize statuses left behind by
                            // earlier phases.
                            if entry.upload_status == TransferStatus::Pending {
                                entry.upload_status = TransferStatus::Done;
                                changed = true;
                            }
                            if entry.download_status == TransferStatus::Pending {
                                entry.download_status = TransferStatus::Done;
                                changed = true;
                            }
                        }
                    } else if let Some(_key) = &row.remote_key {
                        // Another writer replaced the bytes remotely.
                        match entry.download_status {
                            TransferStatus::Queued | TransferStatus::InProgress => {
                                to_download.push(row.id.clone());
                            }
                            TransferStatus::Error if entry.path == row.path => {
                                // Quarantined after a hash mismatch; only a
                                // content change or retry_errors clears it.
                            }
                            _ => {
                                if entry.download_status != TransferStatus::Pending
                                    || entry.path != row.path
                                    || !entry.last_sync_error.is_empty()
                                {
                                    entry.download_status = TransferStatus::Pending;
                                    entry.path = row.path.clone();
                                    entry.last_sync_error.clear();
                                    changed = true;
                                }
                                to_download.push(row.id.clone());
                            }
                        }
                    } else if entry.path != row.path {
                        // Absent-but-known row moved; track the new path
                        // while waiting for a writer.
                        entry.path = row.path.clone();
                        changed = true;
                    }
                }
            }
        }

        if changed {
            self.store
                .commit(StoreEvent::LocalFileStateSet { value: doc })
                .await?;
        }

        let executor = self.executor()?;
        for file_id in to_download {
            executor.enqueue_download(file_id);
        }
        for file_id in to_upload {
            executor.enqueue_upload(file_id);
        }

        for file_id in to_cleanup {
            if let Err(error) = self.on_file_deleted(&file_id).await {
                tracing::warn!(file_id = %file_id, error = %error, "Deletion cleanup failed");
            }
        }

        Ok(())
    }

    fn needs_deletion_cleanup(
        &self,
        local_files: &HashMap<String, LocalFileState>,
        file_id: &str,
    ) -> bool {
        local_files.contains_key(file_id)
            || self
                .pending_remote_deletes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(file_id)
            || self
                .inflight_uploads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(file_id)
    }

    /// Deletion race protocol, steps 2-4. The `FileDeleted` event is
    /// already committed when this runs. Local removal is best-effort; the
    /// remote object must go even if an upload for this id is in flight,
    /// so a running upload defers the delete to its own completion path.
    pub async fn on_file_deleted(&self, file_id: &str) -> SyncResult<()> {
        let Some(row) = self.store.file_by_id(file_id).await? else {
            return Ok(());
        };

        if let Err(error) = self.blobs.delete_file(&row.path).await {
            if !matches!(error, SyncError::FileNotFound { .. }) {
                tracing::warn!(path = %row.path, error = %error, "Local blob removal failed");
            }
        }

        let key = row
            .remote_key
            .clone()
            .unwrap_or_else(|| paths::blob_path(&self.store_id, &row.content_hash));

        let upload_running = self
            .inflight_uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(file_id);
        if upload_running {
            tracing::debug!(file_id = %file_id, "Delete races an in-flight upload, deferring remote delete");
            self.pending_remote_deletes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(file_id.to_string(), key);
            return Ok(());
        }

        self.delete_remote_and_forget(file_id, &key).await
    }

    async fn delete_remote_and_forget(&self, file_id: &str, key: &str) -> SyncResult<()> {
        match self.remote.delete(key).await {
            Ok(()) => {
                self.remove_local_state(file_id).await?;
                tracing::info!(file_id = %file_id, key = %key, "File fully deleted");
                Ok(())
            }
            Err(error) => {
                // Keep the intent; the next reconcile pass retries.
                self.pending_remote_deletes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(file_id.to_string(), key.to_string());
                Err(error)
            }
        }
    }

    /// Best-effort removal of a remote object orphaned by an update; the
    /// caller decides whether failure matters.
    pub async fn delete_remote_object(&self, key: &str) -> SyncResult<()> {
        self.remote.delete(key).await
    }

    /// A URL the host can fetch the object from directly.
    pub async fn remote_download_url(&self, key: &str) -> SyncResult<String> {
        self.remote.get_download_url(key).await
    }

    /// Run the deferred remote delete recorded for `file_id`, if any.
    /// Returns whether a deferred delete existed.
    async fn finish_pending_delete(&self, file_id: &str) -> bool {
        let key = self
            .pending_remote_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(file_id);
        let Some(key) = key else {
            return false;
        };
        if let Err(error) = self.delete_remote_and_forget(file_id, &key).await {
            tracing::warn!(file_id = %file_id, error = %error, "Deferred remote delete failed");
        }
        true
    }

    // ----- per-session state helpers -----

    async fn update_local_state<F>(&self, file_id: &str, update: F) -> SyncResult<()>
    where
        F: FnOnce(&mut LocalFileState),
    {
        let mut doc = self.store.local_file_state().await?;
        match doc.local_files.get_mut(file_id) {
            Some(entry) => {
                update(entry);
                self.store
                    .commit(StoreEvent::LocalFileStateSet { value: doc })
                    .await
            }
            None => {
                tracing::debug!(file_id = %file_id, "No local state entry to update");
                Ok(())
            }
        }
    }

    /// Insert or replace one entry and commit the patch.
    pub async fn set_local_state(&self, file_id: &str, state: LocalFileState) -> SyncResult<()> {
        let mut doc = self.store.local_file_state().await?;
        doc.local_files.insert(file_id.to_string(), state);
        self.store
            .commit(StoreEvent::LocalFileStateSet { value: doc })
            .await
    }

    async fn remove_local_state(&self, file_id: &str) -> SyncResult<()> {
        let mut doc = self.store.local_file_state().await?;
        if doc.local_files.remove(file_id).is_some() {
            self.store
                .commit(StoreEvent::LocalFileStateSet { value: doc })
                .await?;
        }
        Ok(())
    }

    // ----- transfer tasks -----

    fn progress_callback(&self, kind: TransferKind, file_id: &str) -> ProgressFn {
        let events = self.events.clone();
        let file_id = file_id.to_string();
        Arc::new(move |loaded, total| {
            let event = match kind {
                TransferKind::Upload => SyncEvent::UploadProgress {
                    file_id: file_id.clone(),
                    loaded,
                    total,
                },
                TransferKind::Download => SyncEvent::DownloadProgress {
                    file_id: file_id.clone(),
                    loaded,
                    total,
                },
            };
            events.emit(event);
        })
    }

    async fn run_upload(&self, file_id: &str) -> SyncResult<()> {
        let Some(row) = self.store.file_by_id(file_id).await? else {
            return Ok(());
        };
        if row.is_deleted() {
            self.finish_pending_delete(file_id).await;
            return Ok(());
        }

        self.inflight_uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_id.to_string());

        let result = self.upload_inner(file_id, &row).await;

        self.inflight_uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(file_id);

        result
    }

    async fn upload_inner(&self, file_id: &str, row: &FileRecord) -> SyncResult<()> {
        self.update_local_state(file_id, |entry| {
            entry.upload_status = TransferStatus::InProgress;
        })
        .await?;
        self.events.emit(SyncEvent::UploadStarted {
            file_id: file_id.to_string(),
        });

        let bytes = self.blobs.read_file(&row.path).await?;
        let blob = crate::core::FileBlob::new(
            paths::file_name(&row.path),
            "application/octet-stream",
            bytes,
        );
        let key = paths::blob_path(&self.store_id, &row.content_hash);
        let progress = self.progress_callback(TransferKind::Upload, file_id);

        let outcome = self.remote.upload(&blob, &key, Some(progress)).await?;

        // A delete that raced this upload wins: skip the row update and
        // take the remote object right back down.
        if self.finish_pending_delete(file_id).await {
            return Ok(());
        }

        self.store
            .commit(StoreEvent::FileUpdated {
                id: row.id.clone(),
                path: row.path.clone(),
                remote_key: outcome.key.clone(),
                content_hash: row.content_hash.clone(),
                updated_at: now_millis(),
            })
            .await?;
        self.update_local_state(file_id, |entry| {
            entry.upload_status = TransferStatus::Done;
            entry.last_sync_error.clear();
        })
        .await?;
        self.events.emit(SyncEvent::UploadCompleted {
            file_id: file_id.to_string(),
            remote_key: outcome.key,
        });

        // A delete committed during the row update was deferred onto us
        // because the upload still counted as running.
        self.finish_pending_delete(file_id).await;
        Ok(())
    }

    async fn run_download(&self, file_id: &str) -> SyncResult<()> {
        let Some(row) = self.store.file_by_id(file_id).await? else {
            return Ok(());
        };
        // The row may have been deleted or replaced since the intent was
        // queued; superseded intents are dropped here.
        if row.is_deleted() {
            return Ok(());
        }
        let Some(key) = row.remote_key.clone() else {
            return Ok(());
        };

        let row_path = row.path.clone();
        self.update_local_state(file_id, |entry| {
            entry.download_status = TransferStatus::InProgress;
            entry.path = row_path;
        })
        .await?;
        self.events.emit(SyncEvent::DownloadStarted {
            file_id: file_id.to_string(),
        });

        let progress = self.progress_callback(TransferKind::Download, file_id);
        let blob = self.remote.download(&key, Some(progress)).await?;

        self.blobs.write_file(&row.path, &blob.bytes).await?;
        let written = self.blobs.read_file(&row.path).await?;
        let observed_hash = sha256_hex(&written);

        if observed_hash == row.content_hash {
            self.update_local_state(file_id, |entry| {
                entry.local_hash = observed_hash;
                entry.download_status = TransferStatus::Done;
                entry.last_sync_error.clear();
            })
            .await?;
            self.events.emit(SyncEvent::DownloadCompleted {
                file_id: file_id.to_string(),
            });
            return Ok(());
        }

        tracing::warn!(
            file_id = %file_id,
            expected = %row.content_hash,
            observed = %observed_hash,
            "Downloaded bytes failed hash verification"
        );

        match self.options.hash_mismatch_policy {
            HashMismatchPolicy::Quarantine => {
                // Keep the bytes on disk for inspection; terminal error,
                // no retry.
                self.update_local_state(file_id, |entry| {
                    entry.local_hash = observed_hash;
                    entry.download_status = TransferStatus::Error;
                    entry.last_sync_error = "hash mismatch".to_string();
                })
                .await?;
                self.events.emit(SyncEvent::DownloadFailed {
                    file_id: file_id.to_string(),
                    error: "hash mismatch".to_string(),
                });
                Ok(())
            }
            HashMismatchPolicy::Redownload => Err(SyncError::HashMismatch {
                file_id: file_id.to_string(),
                expected: row.content_hash.clone(),
                actual: observed_hash,
            }),
        }
    }

    /// Sweep local blobs no longer referenced by any active row. Returns
    /// the number of blobs removed.
    pub async fn sweep_unreferenced_blobs(&self) -> SyncResult<usize> {
        let rows = self.store.active_files().await?;
        let referenced: HashSet<&str> = rows.iter().map(|r| r.content_hash.as_str()).collect();

        let dir = paths::blob_dir(&self.store_id);
        let mut removed = 0;
        for name in self.blobs.list_files(&dir).await? {
            if paths::is_hex_hash(&name) && !referenced.contains(name.as_str()) {
                let path = format!("{dir}/{name}");
                match self.blobs.delete_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(error) => {
                        tracing::warn!(path = %path, error = %error, "GC removal failed");
                    }
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed = removed, "Swept unreferenced local blobs");
        }
        Ok(removed)
    }
}

#[async_trait]
impl TransferHandler for Reconciler {
    async fn run(&self, kind: TransferKind, file_id: &str) -> SyncResult<()> {
        match kind {
            TransferKind::Upload => self.run_upload(file_id).await,
            TransferKind::Download => self.run_download(file_id).await,
        }
    }

    async fn on_abandoned(&self, kind: TransferKind, file_id: &str, error: &SyncError) {
        let message = error.to_string();
        let result = self
            .update_local_state(file_id, |entry| {
                match kind {
                    TransferKind::Upload => entry.upload_status = TransferStatus::Error,
                    TransferKind::Download => entry.download_status = TransferStatus::Error,
                }
                entry.last_sync_error = message.clone();
            })
            .await;
        if let Err(commit_error) = result {
            tracing::error!(
                file_id = %file_id,
                error = %commit_error,
                "Failed to record terminal transfer error"
            );
        }

        self.events.emit(match kind {
            TransferKind::Upload => SyncEvent::UploadFailed {
                file_id: file_id.to_string(),
                error: error.to_string(),
            },
            TransferKind::Download => SyncEvent::DownloadFailed {
                file_id: file_id.to_string(),
                error: error.to_string(),
            },
        });

        // A delete that raced the failing upload still has to win.
        if kind == TransferKind::Upload {
            self.finish_pending_delete(file_id).await;
        }
    }
}

#[async_trait]
impl TransferStateView for Reconciler {
    async fn errored_transfers(&self) -> Vec<(TransferKind, String)> {
        let Ok(doc) = self.store.local_file_state().await else {
            return Vec::new();
        };
        let mut errored = Vec::new();
        for (file_id, entry) in &doc.local_files {
            if entry.upload_status == TransferStatus::Error {
                errored.push((TransferKind::Upload, file_id.clone()));
            }
            if entry.download_status == TransferStatus::Error {
                errored.push((TransferKind::Download, file_id.clone()));
            }
        }
        errored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::remote::MemoryRemoteStorage;
    use crate::store::MemoryStore;
    use crate::sync::executor::ExecutorConfig;

    struct Harness {
        store: Arc<MemoryStore>,
        remote: Arc<MemoryRemoteStorage>,
        blobs: Arc<LocalBlobStore>,
        reconciler: Arc<Reconciler>,
        executor: Arc<SyncExecutor>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemoteStorage::new());
        let blobs = Arc::new(LocalBlobStore::new(Arc::new(MemoryFileSystem::new())));
        let reconciler = Reconciler::new(
            store.clone(),
            blobs.clone(),
            remote.clone(),
            EventBus::new(),
            "sid",
            SyncOptions::default(),
        );
        let executor = SyncExecutor::new(
            ExecutorConfig::from(&SyncOptions::default()),
            reconciler.clone(),
            reconciler.clone(),
        );
        reconciler.attach_executor(executor.clone());
        Harness {
            store,
            remote,
            blobs,
            reconciler,
            executor,
        }
    }

    async fn seed_remote_row(h: &Harness, hash: &str) {
        let path = paths::blob_path("sid", hash);
        h.store
            .commit(StoreEvent::FileCreated {
                id: hash.to_string(),
                path: path.clone(),
                content_hash: hash.to_string(),
                created_at: 1,
                updated_at: 1,
            })
            .await
            .unwrap();
        h.store
            .commit(StoreEvent::FileUpdated {
                id: hash.to_string(),
                path: path.clone(),
                remote_key: path,
                content_hash: hash.to_string(),
                updated_at: 2,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_remote_row_classified_for_download() {
        let h = harness();
        let hash = sha256_hex(b"payload");
        seed_remote_row(&h, &hash).await;

        h.reconciler.reconcile().await.unwrap();

        let doc = h.store.local_file_state().await.unwrap();
        let entry = doc.local_files.get(&hash).unwrap();
        assert_eq!(entry.download_status, TransferStatus::Pending);
        assert_eq!(entry.upload_status, TransferStatus::Done);
        assert_eq!(entry.local_hash, "");
        assert_eq!(h.executor.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_row_without_remote_waits_for_writer() {
        let h = harness();
        h.store
            .commit(StoreEvent::FileCreated {
                id: "h1".to_string(),
                path: "files/sid/h1".to_string(),
                content_hash: "h1".to_string(),
                created_at: 1,
                updated_at: 1,
            })
            .await
            .unwrap();

        h.reconciler.reconcile().await.unwrap();

        let doc = h.store.local_file_state().await.unwrap();
        let entry = doc.local_files.get("h1").unwrap();
        assert_eq!(entry.download_status, TransferStatus::Pending);
        assert_eq!(entry.upload_status, TransferStatus::Pending);
        // Nothing to transfer yet
        assert_eq!(h.executor.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let h = harness();
        let hash = sha256_hex(b"payload");
        seed_remote_row(&h, &hash).await;

        h.reconciler.reconcile().await.unwrap();
        let doc_after_first = h.store.local_file_state().await.unwrap();
        let events_after_first = h.store.event_count();

        h.reconciler.reconcile().await.unwrap();
        let doc_after_second = h.store.local_file_state().await.unwrap();

        assert_eq!(doc_after_first, doc_after_second);
        // Second pass found nothing to change and committed nothing new
        assert_eq!(h.store.event_count(), events_after_first);
        // Executor dedup keeps a single intent
        assert_eq!(h.executor.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_quarantined_download_not_requeued() {
        let h = harness();
        let hash = sha256_hex(b"payload");
        seed_remote_row(&h, &hash).await;
        let path = paths::blob_path("sid", &hash);

        h.reconciler
            .set_local_state(
                &hash,
                LocalFileState {
                    path: path.clone(),
                    local_hash: "mismatched".to_string(),
                    upload_status: TransferStatus::Done,
                    download_status: TransferStatus::Error,
                    last_sync_error: "hash mismatch".to_string(),
                },
            )
            .await
            .unwrap();

        h.reconciler.reconcile().await.unwrap();
        assert_eq!(h.executor.queued_count(), 0);

        let doc = h.store.local_file_state().await.unwrap();
        assert_eq!(
            doc.local_files.get(&hash).unwrap().download_status,
            TransferStatus::Error
        );
    }

    #[tokio::test]
    async fn test_download_task_verifies_and_records_hash() {
        let h = harness();
        let hash = sha256_hex(b"payload");
        seed_remote_row(&h, &hash).await;
        let key = paths::blob_path("sid", &hash);
        h.remote.put_object(&key, b"payload".to_vec(), "text/plain");

        h.reconciler.reconcile().await.unwrap();
        h.reconciler.run(TransferKind::Download, &hash).await.unwrap();

        let doc = h.store.local_file_state().await.unwrap();
        let entry = doc.local_files.get(&hash).unwrap();
        assert_eq!(entry.download_status, TransferStatus::Done);
        assert_eq!(entry.local_hash, hash);
        assert_eq!(h.blobs.read_file(&key).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_download_hash_mismatch_quarantines() {
        let h = harness();
        let hash = sha256_hex(b"payload");
        seed_remote_row(&h, &hash).await;
        let key = paths::blob_path("sid", &hash);
        // Remote serves poisoned bytes under the expected key
        h.remote.put_object(&key, b"poisoned".to_vec(), "text/plain");

        h.reconciler.reconcile().await.unwrap();
        // Quarantine policy reports success (terminal, no retry)
        h.reconciler.run(TransferKind::Download, &hash).await.unwrap();

        let doc = h.store.local_file_state().await.unwrap();
        let entry = doc.local_files.get(&hash).unwrap();
        assert_eq!(entry.download_status, TransferStatus::Error);
        assert_eq!(entry.last_sync_error, "hash mismatch");
        // The poisoned file is kept for inspection
        assert_eq!(h.blobs.read_file(&key).await.unwrap(), b"poisoned");
    }

    #[tokio::test]
    async fn test_gc_sweeps_only_unreferenced_blobs() {
        let h = harness();
        let live = sha256_hex(b"live");
        seed_remote_row(&h, &live).await;

        let live_path = paths::blob_path("sid", &live);
        let dead = sha256_hex(b"dead");
        let dead_path = paths::blob_path("sid", &dead);
        h.blobs.write_file(&live_path, b"live").await.unwrap();
        h.blobs.write_file(&dead_path, b"dead").await.unwrap();
        // Non-hash names are never touched
        h.blobs.write_file("files/sid/keep.tmp", b"x").await.unwrap();

        let removed = h.reconciler.sweep_unreferenced_blobs().await.unwrap();
        assert_eq!(removed, 1);
        assert!(h.blobs.file_exists(&live_path).await.unwrap());
        assert!(!h.blobs.file_exists(&dead_path).await.unwrap());
        assert!(h.blobs.file_exists("files/sid/keep.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_errored_transfers_view() {
        let h = harness();
        h.reconciler
            .set_local_state(
                "f1",
                LocalFileState {
                    path: "files/sid/f1".to_string(),
                    local_hash: "f1".to_string(),
                    upload_status: TransferStatus::Error,
                    download_status: TransferStatus::Done,
                    last_sync_error: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        let errored = h.reconciler.errored_transfers().await;
        assert_eq!(errored, vec![(TransferKind::Upload, "f1".to_string())]);
    }
}
