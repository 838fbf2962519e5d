//! Filesystem capability seam
//!
//! The engine only ever touches storage through this trait, so tests run on
//! an in-memory filesystem and production code runs on the native one. Paths
//! are normalized relative strings (`files/<sid>/<hash>`); adapters own the
//! mapping to their backing medium.

pub mod memory;
pub mod native;

use crate::core::SyncResult;
use async_trait::async_trait;

pub use memory::MemoryFileSystem;
pub use native::NativeFileSystem;

/// Metadata for one stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_directory: bool,
    /// Unix epoch milliseconds, when the backing medium tracks it.
    pub modified_at: Option<i64>,
}

/// The generic filesystem capability set.
///
/// `write_file` is atomic at file granularity: readers observe either the
/// previous content or the full new content, never a partial write.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>>;

    async fn write_file(&self, path: &str, bytes: &[u8]) -> SyncResult<()>;

    /// Names (not full paths) of entries directly under `path`.
    async fn read_directory(&self, path: &str) -> SyncResult<Vec<String>>;

    async fn make_directory(&self, path: &str) -> SyncResult<()>;

    async fn remove(&self, path: &str) -> SyncResult<()>;

    async fn exists(&self, path: &str) -> SyncResult<bool>;

    async fn stat(&self, path: &str) -> SyncResult<FileStat>;

    /// Opaque handle the host environment can use to display the file
    /// (a file URI, a blob URL, a short-lived HTTP URL).
    fn file_url(&self, path: &str) -> Option<String>;
}
