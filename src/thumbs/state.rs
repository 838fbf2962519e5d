//! Thumbnail pipeline state types
//!
//! Per-session bookkeeping for derived artifacts. Artifacts are keyed by
//! content hash so identical inputs share thumbnails; the state document
//! maps file ids onto that shared space.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of one derived size for one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThumbnailStatus {
    Pending,
    Queued,
    Generating,
    Done,
    Error,
    Skipped,
}

/// State of one configured size for one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailSizeState {
    pub status: ThumbnailStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<i64>,
}

impl ThumbnailSizeState {
    pub fn pending() -> Self {
        Self {
            status: ThumbnailStatus::Pending,
            path: None,
            error: None,
            generated_at: None,
        }
    }

    pub fn done(path: impl Into<String>, generated_at: i64) -> Self {
        Self {
            status: ThumbnailStatus::Done,
            path: Some(path.into()),
            error: None,
            generated_at: Some(generated_at),
        }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            status: ThumbnailStatus::Error,
            path: None,
            error: Some(error.into()),
            generated_at: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ThumbnailStatus::Skipped,
            path: None,
            error: None,
            generated_at: None,
        }
    }
}

/// Thumbnail state for one file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileThumbnailState {
    pub content_hash: String,
    pub mime_type: String,
    #[serde(default)]
    pub sizes: HashMap<String, ThumbnailSizeState>,
}

impl FileThumbnailState {
    /// True when every configured size reached a terminal status.
    pub fn is_settled(&self, size_names: &[String]) -> bool {
        size_names.iter().all(|name| {
            self.sizes.get(name).is_some_and(|s| {
                matches!(
                    s.status,
                    ThumbnailStatus::Done | ThumbnailStatus::Error | ThumbnailStatus::Skipped
                )
            })
        })
    }
}

/// Value of the `thumbnailState` per-session document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailStateDoc {
    pub files: HashMap<String, FileThumbnailState>,
    /// Hash of the generating configuration; a change invalidates every
    /// previously recorded artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}
