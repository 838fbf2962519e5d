//! In-memory filesystem for tests
//!
//! Stores files in a map keyed by normalized path and tracks directories
//! explicitly so `read_directory` and `stat` behave like a real filesystem.

use crate::core::{now_millis, SyncError, SyncResult};
use crate::fs::{FileStat, FileSystem};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryFileSystem {
    inner: Mutex<Inner>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files, for test assertions.
    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    /// All stored paths, for test assertions.
    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_parents(inner: &mut Inner, path: &str) {
        let mut prefix = String::new();
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            inner.dirs.insert(prefix.clone());
        }
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> SyncResult<()> {
        let mut inner = self.lock();
        Self::ensure_parents(&mut inner, path);
        inner.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_directory(&self, path: &str) -> SyncResult<Vec<String>> {
        let inner = self.lock();
        if !inner.dirs.contains(path) {
            return Err(SyncError::FileNotFound {
                path: path.to_string(),
            });
        }
        let prefix = format!("{path}/");
        let mut names = BTreeSet::new();
        for key in inner.files.keys().chain(inner.dirs.iter()) {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next() {
                    if !first.is_empty() {
                        names.insert(first.to_string());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn make_directory(&self, path: &str) -> SyncResult<()> {
        let mut inner = self.lock();
        Self::ensure_parents(&mut inner, path);
        inner.dirs.insert(path.to_string());
        Ok(())
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        let mut inner = self.lock();
        if inner.files.remove(path).is_some() {
            return Ok(());
        }
        if inner.dirs.remove(path) {
            let prefix = format!("{path}/");
            inner.files.retain(|k, _| !k.starts_with(&prefix));
            inner.dirs.retain(|d| !d.starts_with(&prefix));
            return Ok(());
        }
        Err(SyncError::FileNotFound {
            path: path.to_string(),
        })
    }

    async fn exists(&self, path: &str) -> SyncResult<bool> {
        let inner = self.lock();
        Ok(inner.files.contains_key(path) || inner.dirs.contains(path))
    }

    async fn stat(&self, path: &str) -> SyncResult<FileStat> {
        let inner = self.lock();
        if let Some(bytes) = inner.files.get(path) {
            return Ok(FileStat {
                size: bytes.len() as u64,
                is_directory: false,
                modified_at: Some(now_millis()),
            });
        }
        if inner.dirs.contains(path) {
            return Ok(FileStat {
                size: 0,
                is_directory: true,
                modified_at: None,
            });
        }
        Err(SyncError::FileNotFound {
            path: path.to_string(),
        })
    }

    fn file_url(&self, path: &str) -> Option<String> {
        Some(format!("memory://{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_parents() {
        let fs = MemoryFileSystem::new();
        fs.write_file("files/s/abc", b"data").await.unwrap();

        assert_eq!(fs.read_file("files/s/abc").await.unwrap(), b"data");
        assert!(fs.exists("files").await.unwrap());
        assert!(fs.exists("files/s").await.unwrap());
        assert_eq!(fs.read_directory("files/s").await.unwrap(), vec!["abc"]);
    }

    #[tokio::test]
    async fn test_remove_directory_recursively() {
        let fs = MemoryFileSystem::new();
        fs.write_file("d/a", b"1").await.unwrap();
        fs.write_file("d/sub/b", b"2").await.unwrap();

        fs.remove("d").await.unwrap();
        assert!(!fs.exists("d/a").await.unwrap());
        assert!(!fs.exists("d/sub/b").await.unwrap());
        assert_eq!(fs.file_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let fs = MemoryFileSystem::new();
        assert_eq!(
            fs.read_file("nope").await.unwrap_err().code(),
            "FILE_NOT_FOUND"
        );
        assert!(fs.read_directory("nope").await.is_err());
        assert!(fs.remove("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_stat() {
        let fs = MemoryFileSystem::new();
        fs.write_file("x/y", b"12345").await.unwrap();

        let stat = fs.stat("x/y").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_directory);

        let dir_stat = fs.stat("x").await.unwrap();
        assert!(dir_stat.is_directory);
    }
}
