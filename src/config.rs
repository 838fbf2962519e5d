//! Engine configuration
//!
//! Plain config structs with defaults. `RemoteConfig` describes the signer
//! service, `SyncOptions` tunes the executor and reconciler, and
//! `ThumbnailOptions` configures the derived-artifact pipeline.

use std::collections::HashMap;
use std::path::PathBuf;

/// Signer service configuration for the HTTP remote adapter.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Base URL of the signer service.
    pub signer_base_url: String,
    /// Attached to every signer call as `Authorization: Bearer ...`.
    pub auth_token: Option<String>,
    /// Extra headers attached to every signer call.
    pub headers: HashMap<String, String>,
}

impl RemoteConfig {
    pub fn new(signer_base_url: impl Into<String>) -> Self {
        Self {
            signer_base_url: signer_base_url.into(),
            auth_token: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Recovery policy when downloaded bytes do not hash to the row's
/// `content_hash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMismatchPolicy {
    /// Keep the bytes on disk for inspection, mark the download errored,
    /// and do not retry.
    Quarantine,
    /// Treat the mismatch as a transient failure and let the executor
    /// retry the download.
    Redownload,
}

/// Tuning knobs for the sync engine.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Caps concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// Caps concurrent uploads.
    pub max_concurrent_uploads: usize,
    /// First retry delay; doubles per attempt.
    pub base_delay_ms: u64,
    /// Ceiling for the exponential backoff.
    pub max_delay_ms: u64,
    /// Uniform jitter added on top of each backoff sleep.
    pub jitter_ms: u64,
    /// Retries after the first attempt; a handler runs at most
    /// `max_retries + 1` times per enqueue.
    pub max_retries: u32,
    /// Cadence of offline-probe health checks; `None` disables probing.
    pub health_check_interval_ms: Option<u64>,
    /// Idle delay before unreferenced local blobs are swept; `None`
    /// disables GC.
    pub gc_delay_ms: Option<u64>,
    /// What to do when a download fails hash verification.
    pub hash_mismatch_policy: HashMismatchPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            max_concurrent_uploads: 2,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            max_retries: 3,
            health_check_interval_ms: None,
            gc_delay_ms: None,
            hash_mismatch_policy: HashMismatchPolicy::Quarantine,
        }
    }
}

/// One configured thumbnail output size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThumbnailSize {
    /// Size name used in the artifact path (`small`, `medium`, ...).
    pub name: String,
    /// Longest-edge bound for the derived image.
    pub max_dimension: u32,
}

impl ThumbnailSize {
    pub fn new(name: impl Into<String>, max_dimension: u32) -> Self {
        Self {
            name: name.into(),
            max_dimension,
        }
    }
}

/// Thumbnail pipeline configuration.
#[derive(Clone, Debug)]
pub struct ThumbnailOptions {
    /// Output sizes; one artifact per size per file.
    pub sizes: Vec<ThumbnailSize>,
    /// Output encoding, used as the artifact file extension.
    pub format: String,
    /// Per-request worker timeout.
    pub worker_timeout_ms: u64,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            sizes: vec![
                ThumbnailSize::new("small", 128),
                ThumbnailSize::new("medium", 512),
            ],
            format: "webp".to_string(),
            worker_timeout_ms: 60_000,
        }
    }
}

/// Default on-disk location for local blob storage.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filesync")
}
