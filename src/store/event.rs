//! Domain events committed to the store
//!
//! The store holds a replicated log of immutable file events plus
//! per-session document writes. File events materialize into the `files`
//! table; document events replace the session-local document value and are
//! not replicated.

use crate::core::LocalFileState;
use crate::thumbs::state::ThumbnailStateDoc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value of the `localFileState` per-session document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFileStateDoc {
    pub local_files: HashMap<String, LocalFileState>,
}

/// Events the sync engine commits or observes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum StoreEvent {
    /// A file came into existence; `id` equals the content hash at
    /// creation time.
    #[serde(rename = "v1.FileCreated", rename_all = "camelCase")]
    FileCreated {
        id: String,
        path: String,
        content_hash: String,
        created_at: i64,
        updated_at: i64,
    },

    /// Path, bytes, or remote location changed. An empty `remote_key`
    /// clears the remote pointer so the reconciler re-uploads.
    #[serde(rename = "v1.FileUpdated", rename_all = "camelCase")]
    FileUpdated {
        id: String,
        path: String,
        remote_key: String,
        content_hash: String,
        updated_at: i64,
    },

    /// Tombstone; once committed it never clears.
    #[serde(rename = "v1.FileDeleted", rename_all = "camelCase")]
    FileDeleted { id: String, deleted_at: i64 },

    /// Replaces the `localFileState` per-session document.
    #[serde(rename = "localFileStateSet")]
    LocalFileStateSet { value: LocalFileStateDoc },

    /// Replaces the `thumbnailState` per-session document.
    #[serde(rename = "thumbnailStateSet")]
    ThumbnailStateSet { value: ThumbnailStateDoc },
}

impl StoreEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::FileCreated { .. } => "v1.FileCreated",
            StoreEvent::FileUpdated { .. } => "v1.FileUpdated",
            StoreEvent::FileDeleted { .. } => "v1.FileDeleted",
            StoreEvent::LocalFileStateSet { .. } => "localFileStateSet",
            StoreEvent::ThumbnailStateSet { .. } => "thumbnailStateSet",
        }
    }

    /// Whether this event materializes into the `files` table.
    pub fn touches_files(&self) -> bool {
        matches!(
            self,
            StoreEvent::FileCreated { .. }
                | StoreEvent::FileUpdated { .. }
                | StoreEvent::FileDeleted { .. }
        )
    }
}
