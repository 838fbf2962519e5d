//! In-memory event-sourced store
//!
//! Append-only event log with a materialized `files` table and per-session
//! documents. Commits are serialized through one lock (single writer);
//! subscribers get a poke per commit on the channel matching the entity the
//! event touches.

use crate::core::{FileRecord, SyncError, SyncResult};
use crate::store::event::{LocalFileStateDoc, StoreEvent};
use crate::store::{Query, QueryResult, Store, StoreChange, StoreSchema};
use crate::thumbs::state::ThumbnailStateDoc;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Default)]
struct Materialized {
    log: Vec<StoreEvent>,
    files: HashMap<String, FileRecord>,
    local_file_state: LocalFileStateDoc,
    thumbnail_state: ThumbnailStateDoc,
}

pub struct MemoryStore {
    inner: Mutex<Materialized>,
    files_tx: broadcast::Sender<StoreChange>,
    docs_tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (files_tx, _) = broadcast::channel(256);
        let (docs_tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Materialized::default()),
            files_tx,
            docs_tx,
        }
    }

    /// Number of committed events, for test assertions.
    pub fn event_count(&self) -> usize {
        self.lock().log.len()
    }

    /// Committed events of a given name, for test assertions.
    pub fn events_named(&self, name: &str) -> Vec<StoreEvent> {
        self.lock()
            .log
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Materialized> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(state: &mut Materialized, event: &StoreEvent) -> SyncResult<()> {
        match event {
            StoreEvent::FileCreated {
                id,
                path,
                content_hash,
                created_at,
                updated_at,
            } => {
                // Re-creating an existing id is a no-op: ids are content
                // hashes, so the row is necessarily identical.
                if !state.files.contains_key(id) {
                    state.files.insert(
                        id.clone(),
                        FileRecord {
                            id: id.clone(),
                            path: path.clone(),
                            content_hash: content_hash.clone(),
                            remote_key: None,
                            created_at: *created_at,
                            updated_at: *updated_at,
                            deleted_at: None,
                        },
                    );
                }
            }
            StoreEvent::FileUpdated {
                id,
                path,
                remote_key,
                content_hash,
                updated_at,
            } => {
                if let Some(row) = state.files.get_mut(id) {
                    row.path = path.clone();
                    row.content_hash = content_hash.clone();
                    row.remote_key = if remote_key.is_empty() {
                        None
                    } else {
                        Some(remote_key.clone())
                    };
                    row.updated_at = *updated_at;
                } else {
                    tracing::warn!(id = %id, "FileUpdated for unknown row ignored");
                }
            }
            StoreEvent::FileDeleted { id, deleted_at } => {
                if let Some(row) = state.files.get_mut(id) {
                    // Tombstones never clear; the earliest one wins.
                    if row.deleted_at.is_none() {
                        row.deleted_at = Some(*deleted_at);
                    }
                } else {
                    tracing::warn!(id = %id, "FileDeleted for unknown row ignored");
                }
            }
            StoreEvent::LocalFileStateSet { value } => {
                state.local_file_state = value.clone();
            }
            StoreEvent::ThumbnailStateSet { value } => {
                state.thumbnail_state = value.clone();
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn schema(&self) -> StoreSchema {
        StoreSchema {
            tables: vec!["files".to_string()],
            documents: vec!["localFileState".to_string(), "thumbnailState".to_string()],
            events: vec![
                "v1.FileCreated".to_string(),
                "v1.FileUpdated".to_string(),
                "v1.FileDeleted".to_string(),
                "localFileStateSet".to_string(),
                "thumbnailStateSet".to_string(),
            ],
        }
    }

    async fn query(&self, query: Query) -> SyncResult<QueryResult> {
        let state = self.lock();
        Ok(match query {
            Query::ActiveFiles => {
                let mut files: Vec<FileRecord> = state
                    .files
                    .values()
                    .filter(|f| !f.is_deleted())
                    .cloned()
                    .collect();
                files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
                QueryResult::Files(files)
            }
            Query::AllFiles => {
                let mut files: Vec<FileRecord> = state.files.values().cloned().collect();
                files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
                QueryResult::Files(files)
            }
            Query::FileById(id) => QueryResult::File(state.files.get(&id).cloned()),
            Query::LocalFileState => QueryResult::LocalFileState(state.local_file_state.clone()),
            Query::ThumbnailState => QueryResult::ThumbnailState(state.thumbnail_state.clone()),
        })
    }

    async fn commit(&self, event: StoreEvent) -> SyncResult<()> {
        let touches_files = event.touches_files();
        let name = event.name();
        {
            let mut state = self.lock();
            Self::apply(&mut state, &event)
                .map_err(|e| SyncError::Store(format!("apply {name}: {e}")))?;
            state.log.push(event);
        }

        let change = StoreChange {
            event: name.to_string(),
        };
        let tx = if touches_files {
            &self.files_tx
        } else {
            &self.docs_tx
        };
        let _ = tx.send(change);
        Ok(())
    }

    fn subscribe(&self, query: Query) -> broadcast::Receiver<StoreChange> {
        match query {
            Query::ActiveFiles | Query::AllFiles | Query::FileById(_) => self.files_tx.subscribe(),
            Query::LocalFileState | Query::ThumbnailState => self.docs_tx.subscribe(),
        }
    }
}
