//! Unified error types for the sync engine
//!
//! Provides structured error types with context for all operations.
//! Every error carries a stable code for programmatic handling and a
//! retryability hint consumed by the transfer executor.

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum SyncError {
    // ========== Local Storage Errors ==========
    #[error("filesystem {operation} failed at '{path}': {cause}")]
    FileSystem {
        operation: &'static str,
        path: String,
        cause: String,
    },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    // ========== Transfer Errors ==========
    #[error("upload failed for key '{key}': {cause}")]
    Upload { key: String, cause: String },

    #[error("download failed for key '{key}': {cause}")]
    Download { key: String, cause: String },

    #[error("remote delete failed for key '{key}': {cause}")]
    Delete { key: String, cause: String },

    #[error("signer rejected {endpoint}: status {status}")]
    SignerStatus { endpoint: String, status: u16 },

    // ========== Hash Errors ==========
    #[error("hash mismatch for file {file_id}: expected {expected}, got {actual}")]
    HashMismatch {
        file_id: String,
        expected: String,
        actual: String,
    },

    #[error("hashing failed: {0}")]
    Hash(String),

    // ========== Store Errors ==========
    #[error("store schema is missing required entity: {missing}")]
    SchemaMismatch { missing: String },

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("unknown file: {file_id}")]
    UnknownFile { file_id: String },

    // ========== Lifecycle Errors ==========
    #[error("sync engine already initialized")]
    AlreadyInitialized,

    #[error("sync engine not initialized")]
    NotInitialized,

    #[error("sync engine is disposed")]
    Disposed,

    // ========== Worker Errors ==========
    #[error("worker communication failed: {0}")]
    WorkerCommunication(String),

    #[error("worker request {request_id} timed out after {timeout_ms}ms")]
    WorkerTimeout { request_id: u64, timeout_ms: u64 },

    #[error("thumbnail generation failed: {0}")]
    ThumbnailGeneration(String),

    // ========== Internal Errors ==========
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Stable error code for programmatic consumers
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::FileSystem { .. } => "FILESYSTEM_ERROR",
            SyncError::FileNotFound { .. } => "FILE_NOT_FOUND",
            SyncError::InvalidPath { .. } => "INVALID_PATH",
            SyncError::Upload { .. } => "UPLOAD_ERROR",
            SyncError::Download { .. } => "DOWNLOAD_ERROR",
            SyncError::Delete { .. } => "DELETE_ERROR",
            SyncError::SignerStatus { .. } => "SIGNER_STATUS",
            SyncError::HashMismatch { .. } => "HASH_MISMATCH",
            SyncError::Hash(_) => "HASH_ERROR",
            SyncError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            SyncError::Store(_) => "STORE_ERROR",
            SyncError::UnknownFile { .. } => "UNKNOWN_FILE",
            SyncError::AlreadyInitialized => "ALREADY_INITIALIZED",
            SyncError::NotInitialized => "NOT_INITIALIZED",
            SyncError::Disposed => "DISPOSED",
            SyncError::WorkerCommunication(_) => "WORKER_COMMUNICATION",
            SyncError::WorkerTimeout { .. } => "WORKER_TIMEOUT",
            SyncError::ThumbnailGeneration(_) => "THUMBNAIL_GENERATION",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is recoverable by retry
    ///
    /// Transfer and store errors are transient by default; contract and
    /// hash-mismatch errors are not. A 4xx from the signer is persistent,
    /// everything else on that path is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Upload { .. }
            | SyncError::Download { .. }
            | SyncError::Delete { .. }
            | SyncError::Store(_)
            | SyncError::WorkerTimeout { .. } => true,
            SyncError::SignerStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Shorthand for a filesystem error with context
    pub fn fs(operation: &'static str, path: impl Into<String>, cause: impl ToString) -> Self {
        SyncError::FileSystem {
            operation,
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

/// Serializable error response for API consumers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&SyncError> for ErrorResponse {
    fn from(error: &SyncError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        SyncError::Internal(error.to_string())
    }
}
