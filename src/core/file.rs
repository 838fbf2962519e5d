//! File domain types and content hashing
//!
//! The `files` table row, the per-session transfer state, and the payload
//! type handed to ingress and the remote transport. Content hashes are hex
//! SHA-256 of the raw bytes; a file's id IS its hash at creation time.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hashing chunk size; large payloads are fed to the hasher incrementally.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// A materialized row of the `files` table.
///
/// Log-derived and shared across clients. `remote_key`, when set, points at
/// an object whose content hashed to `content_hash` at the time it was
/// written. Once `deleted_at` is set it never clears.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub path: String,
    pub content_hash: String,
    pub remote_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// In-memory file payload: name, MIME type, raw bytes.
///
/// `Bytes` makes clones cheap; preprocessors receive and return
/// `Arc<FileBlob>` so "unchanged" can be signalled by pointer identity.
#[derive(Clone, Debug)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl FileBlob {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Per-transfer status, tracked separately for uploads and downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Pending,
    Queued,
    InProgress,
    Done,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Done | TransferStatus::Error)
    }
}

/// Per-session, non-replicated sync state for one file.
///
/// Lives inside the `localFileState` document. `local_hash` is empty until
/// local bytes have been written and verified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFileState {
    pub path: String,
    pub local_hash: String,
    pub upload_status: TransferStatus,
    pub download_status: TransferStatus,
    #[serde(default)]
    pub last_sync_error: String,
}

impl LocalFileState {
    /// Entry for a row first observed with a remote copy available.
    pub fn awaiting_download(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            local_hash: String::new(),
            upload_status: TransferStatus::Done,
            download_status: TransferStatus::Pending,
            last_sync_error: String::new(),
        }
    }

    /// Entry for a row observed before either side has bytes.
    pub fn awaiting_writer(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            local_hash: String::new(),
            upload_status: TransferStatus::Pending,
            download_status: TransferStatus::Pending,
            last_sync_error: String::new(),
        }
    }

    /// Entry for freshly ingested local bytes that still need uploading.
    pub fn locally_written(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            local_hash: hash.into(),
            upload_status: TransferStatus::Queued,
            download_status: TransferStatus::Done,
            last_sync_error: String::new(),
        }
    }

    /// Both sides hold bytes matching the row's content hash.
    pub fn is_converged(&self, record: &FileRecord) -> bool {
        self.local_hash == record.content_hash
            && record.remote_key.is_some()
            && self.upload_status == TransferStatus::Done
            && self.download_status == TransferStatus::Done
    }
}

/// Result of a successful `save_file` / `update_file` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileResult {
    pub file_id: String,
    pub path: String,
    pub content_hash: String,
}

/// Hex SHA-256 of a byte slice, fed to the hasher in chunks.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(HASH_CHUNK_SIZE) {
        hasher.update(chunk);
    }
    hex::encode(hasher.finalize())
}

/// Current time as unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // sha256("hi")
        assert_eq!(
            sha256_hex(b"hi"),
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );
    }

    #[test]
    fn test_sha256_hex_chunking_is_transparent() {
        let big = vec![7u8; 3 * HASH_CHUNK_SIZE + 11];
        let mut hasher = Sha256::new();
        hasher.update(&big);
        assert_eq!(sha256_hex(&big), hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_transfer_status_serialization() {
        let json = serde_json::to_string(&TransferStatus::InProgress).unwrap();
        assert_eq!(json, "\"inProgress\"");
        let back: TransferStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(back, TransferStatus::Pending);
    }

    #[test]
    fn test_local_file_state_convergence() {
        let record = FileRecord {
            id: "h".to_string(),
            path: "files/s/h".to_string(),
            content_hash: "h".to_string(),
            remote_key: Some("files/s/h".to_string()),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };

        let mut state = LocalFileState::locally_written("files/s/h", "h");
        assert!(!state.is_converged(&record));

        state.upload_status = TransferStatus::Done;
        assert!(state.is_converged(&record));

        state.local_hash = "other".to_string();
        assert!(!state.is_converged(&record));
    }

    #[test]
    fn test_local_file_state_roundtrip() {
        let state = LocalFileState::awaiting_download("files/s/abc");
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"downloadStatus\":\"pending\""));
        assert!(json.contains("\"uploadStatus\":\"done\""));

        let back: LocalFileState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
