//! Content-addressed path layout
//!
//! Blobs live at `files/<store_id>/<content_hash>`, thumbnails at
//! `thumbnails/<content_hash>/<size_name>.<format>`. The store id segment
//! namespaces multiple stores on one device; two files with identical bytes
//! share one blob.

use crate::core::error::{SyncError, SyncResult};

/// Prefix for synced file blobs.
pub const FILES_PREFIX: &str = "files";

/// Prefix for derived thumbnail artifacts.
pub const THUMBNAILS_PREFIX: &str = "thumbnails";

/// Sanitize a consumer-provided store id: `/` and whitespace are stripped.
pub fn sanitize_store_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '/' && !c.is_whitespace())
        .collect()
}

/// Content-addressed path for a file blob.
pub fn blob_path(store_id: &str, content_hash: &str) -> String {
    format!("{FILES_PREFIX}/{store_id}/{content_hash}")
}

/// Directory holding all blobs of one store.
pub fn blob_dir(store_id: &str) -> String {
    format!("{FILES_PREFIX}/{store_id}")
}

/// Path for a derived thumbnail, keyed by content hash so identical inputs
/// share artifacts.
pub fn thumbnail_path(content_hash: &str, size_name: &str, format: &str) -> String {
    format!("{THUMBNAILS_PREFIX}/{content_hash}/{size_name}.{format}")
}

/// Whether a string looks like a hex SHA-256 digest.
pub fn is_hex_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize a storage path: strip a leading `./`, collapse nothing else.
///
/// Rejects empty segments, absolute paths, and `..` traversal.
pub fn normalize(path: &str) -> SyncResult<String> {
    let trimmed = path.strip_prefix("./").unwrap_or(path);

    if trimmed.is_empty() {
        return Err(SyncError::InvalidPath {
            path: path.to_string(),
            reason: "empty path".to_string(),
        });
    }
    if trimmed.starts_with('/') {
        return Err(SyncError::InvalidPath {
            path: path.to_string(),
            reason: "absolute paths are not allowed".to_string(),
        });
    }

    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(SyncError::InvalidPath {
                path: path.to_string(),
                reason: "empty path segment".to_string(),
            });
        }
        if segment == ".." {
            return Err(SyncError::InvalidPath {
                path: path.to_string(),
                reason: "path traversal detected".to_string(),
            });
        }
    }

    Ok(trimmed.to_string())
}

/// Parent directory of a normalized path, if any.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Final segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
