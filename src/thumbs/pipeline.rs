//! Thumbnail pipeline
//!
//! Watches the `files` view for rows whose extension maps to a supported
//! image type, dispatches their local bytes to the worker, stores each
//! derived artifact at `thumbnails/<content_hash>/<size_name>.<format>`,
//! and records the outcome in the `thumbnailState` per-session document.
//! Artifacts are keyed by content hash, so identical inputs share
//! thumbnails and an on-disk artifact short-circuits regeneration.

use crate::config::ThumbnailOptions;
use crate::core::{now_millis, paths, sha256_hex, SyncResult};
use crate::storage::LocalBlobStore;
use crate::store::{Query, Store, StoreEvent, StoreExt};
use crate::thumbs::state::{FileThumbnailState, ThumbnailSizeState, ThumbnailStatus};
use crate::thumbs::worker::{ThumbnailCodec, ThumbnailWorker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sniff the image type from magic bytes. Content-addressed paths carry no
/// extension, so the bytes are the only reliable type source that works
/// for rows written by other sessions too.
pub fn mime_from_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Hash of the generating configuration; a change invalidates previously
/// generated artifacts.
pub fn config_hash(options: &ThumbnailOptions) -> String {
    let mut description = options.format.clone();
    for size in &options.sizes {
        description.push('|');
        description.push_str(&size.name);
        description.push(':');
        description.push_str(&size.max_dimension.to_string());
    }
    sha256_hex(description.as_bytes())
}

pub struct ThumbnailPipeline {
    store: Arc<dyn Store>,
    blobs: Arc<LocalBlobStore>,
    worker: ThumbnailWorker,
    options: ThumbnailOptions,
}

impl ThumbnailPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<LocalBlobStore>,
        codec: Box<dyn ThumbnailCodec>,
        options: ThumbnailOptions,
    ) -> SyncResult<Arc<Self>> {
        let worker = ThumbnailWorker::spawn(
            codec,
            Duration::from_millis(options.worker_timeout_ms.max(1)),
        )?;
        Ok(Arc::new(Self {
            store,
            blobs,
            worker,
            options,
        }))
    }

    /// Spawn the watch loop: an initial pass, then one pass per `files`
    /// change poke.
    pub fn start(self: &Arc<Self>, token: CancellationToken) {
        let pipeline = self.clone();
        let mut changes = self.store.subscribe(Query::ActiveFiles);
        tokio::spawn(async move {
            if let Err(error) = pipeline.run_once().await {
                tracing::warn!(error = %error, "Thumbnail pass failed");
            }
            loop {
                tokio::select! {
                    received = changes.recv() => {
                        match received {
                            Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                                if let Err(error) = pipeline.run_once().await {
                                    tracing::warn!(error = %error, "Thumbnail pass failed");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!("Thumbnail pipeline stopped");
        });
    }

    /// One pass over the current snapshot. Returns how many files had
    /// thumbnails (re)generated.
    pub async fn run_once(&self) -> SyncResult<usize> {
        let rows = self.store.active_files().await?;
        let mut doc = self.store.thumbnail_state().await?;
        let current_config = config_hash(&self.options);
        let mut changed = false;

        if doc.config_hash.as_deref() != Some(current_config.as_str()) {
            if doc.config_hash.is_some() {
                tracing::info!("Thumbnail configuration changed, invalidating artifacts");
            }
            doc.files.clear();
            doc.config_hash = Some(current_config);
            changed = true;
        }

        let size_names: Vec<String> =
            self.options.sizes.iter().map(|s| s.name.clone()).collect();
        let mut generated = 0;

        for row in rows {
            let settled = doc
                .files
                .get(&row.id)
                .is_some_and(|e| e.content_hash == row.content_hash && e.is_settled(&size_names));
            if settled {
                continue;
            }

            // Local bytes may not have arrived yet; skip until they do.
            let bytes = match self.blobs.read_file(&row.path).await {
                Ok(bytes) => bytes,
                Err(crate::core::SyncError::FileNotFound { .. }) => continue,
                Err(error) => return Err(error),
            };

            let Some(mime_type) = mime_from_bytes(&bytes) else {
                // Not an image: settle the row as skipped so it is never
                // re-examined.
                doc.files.insert(
                    row.id.clone(),
                    FileThumbnailState {
                        content_hash: row.content_hash.clone(),
                        mime_type: "application/octet-stream".to_string(),
                        sizes: size_names
                            .iter()
                            .map(|name| (name.clone(), ThumbnailSizeState::skipped()))
                            .collect(),
                    },
                );
                changed = true;
                continue;
            };

            // Artifacts already on disk for this content hash (another file
            // with the same bytes, or an earlier session) are adopted
            // without touching the worker.
            let mut sizes: HashMap<String, ThumbnailSizeState> = HashMap::new();
            let mut missing = Vec::new();
            for size in &self.options.sizes {
                let artifact_path =
                    paths::thumbnail_path(&row.content_hash, &size.name, &self.options.format);
                if self.blobs.file_exists(&artifact_path).await? {
                    sizes.insert(
                        size.name.clone(),
                        ThumbnailSizeState::done(artifact_path, now_millis()),
                    );
                } else {
                    missing.push(size.clone());
                }
            }

            if !missing.is_empty() {
                self.mark_generating(&mut doc.files, &row, mime_type, &missing);
                self.store
                    .commit(StoreEvent::ThumbnailStateSet { value: doc.clone() })
                    .await?;

                match self
                    .worker
                    .generate(bytes, mime_type, &missing, &self.options.format)
                    .await
                {
                    Ok(artifacts) => {
                        let mut produced: HashMap<String, ThumbnailSizeState> = HashMap::new();
                        for artifact in artifacts {
                            let artifact_path = paths::thumbnail_path(
                                &row.content_hash,
                                &artifact.size_name,
                                &artifact.format,
                            );
                            self.blobs.write_file(&artifact_path, &artifact.bytes).await?;
                            produced.insert(
                                artifact.size_name.clone(),
                                ThumbnailSizeState::done(artifact_path, now_millis()),
                            );
                        }
                        for size in &missing {
                            let state = produced.remove(&size.name).unwrap_or_else(|| {
                                // The codec chose not to produce this size.
                                ThumbnailSizeState::skipped()
                            });
                            sizes.insert(size.name.clone(), state);
                        }
                        generated += 1;
                    }
                    Err(error) => {
                        // A failed thumbnail never fails the sync engine.
                        tracing::warn!(
                            file_id = %row.id,
                            error = %error,
                            "Thumbnail generation failed"
                        );
                        for size in &missing {
                            sizes.insert(
                                size.name.clone(),
                                ThumbnailSizeState::errored(error.to_string()),
                            );
                        }
                    }
                }
            }

            doc.files.insert(
                row.id.clone(),
                FileThumbnailState {
                    content_hash: row.content_hash.clone(),
                    mime_type: mime_type.to_string(),
                    sizes,
                },
            );
            changed = true;
        }

        if changed {
            self.store
                .commit(StoreEvent::ThumbnailStateSet { value: doc })
                .await?;
        }
        Ok(generated)
    }

    fn mark_generating(
        &self,
        files: &mut HashMap<String, FileThumbnailState>,
        row: &crate::core::FileRecord,
        mime_type: &str,
        missing: &[crate::config::ThumbnailSize],
    ) {
        let entry = files
            .entry(row.id.clone())
            .or_insert_with(|| FileThumbnailState {
                content_hash: row.content_hash.clone(),
                mime_type: mime_type.to_string(),
                sizes: HashMap::new(),
            });
        entry.content_hash = row.content_hash.clone();
        for size in missing {
            entry.sizes.insert(
                size.name.clone(),
                ThumbnailSizeState {
                    status: ThumbnailStatus::Generating,
                    path: None,
                    error: None,
                    generated_at: None,
                },
            );
        }
    }

    /// Terminate the worker thread.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}
