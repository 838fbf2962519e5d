//! Native filesystem adapter backed by `tokio::fs`
//!
//! All engine paths are joined onto a root directory. Writes go through a
//! temp file in the target directory followed by a rename, so a crash never
//! leaves a partially written blob at the final path.

use crate::core::{SyncError, SyncResult};
use crate::fs::{FileStat, FileSystem};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct NativeFileSystem {
    root: PathBuf,
}

impl NativeFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn map_err(operation: &'static str, path: &str, err: std::io::Error) -> SyncError {
        if err.kind() == ErrorKind::NotFound {
            SyncError::FileNotFound {
                path: path.to_string(),
            }
        } else {
            SyncError::fs(operation, path, err)
        }
    }
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| Self::map_err("read", path, e))
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> SyncResult<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_err("write", path, e))?;
        }

        // Atomic write: temp file in the same directory, then rename.
        let tmp = target.with_extension("tmp.write");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::map_err("write", path, e))?;
        match tokio::fs::rename(&tmp, &target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(Self::map_err("write", path, e))
            }
        }
    }

    async fn read_directory(&self, path: &str) -> SyncResult<Vec<String>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.resolve(path))
            .await
            .map_err(|e| Self::map_err("readDirectory", path, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Self::map_err("readDirectory", path, e))?
        {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(entries)
    }

    async fn make_directory(&self, path: &str) -> SyncResult<()> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| Self::map_err("makeDirectory", path, e))
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        let target = self.resolve(path);
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| Self::map_err("remove", path, e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|e| Self::map_err("remove", path, e))
        } else {
            tokio::fs::remove_file(&target)
                .await
                .map_err(|e| Self::map_err("remove", path, e))
        }
    }

    async fn exists(&self, path: &str) -> SyncResult<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_err("exists", path, e)),
        }
    }

    async fn stat(&self, path: &str) -> SyncResult<FileStat> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| Self::map_err("stat", path, e))?;
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Ok(FileStat {
            size: meta.len(),
            is_directory: meta.is_dir(),
            modified_at,
        })
    }

    fn file_url(&self, path: &str) -> Option<String> {
        Some(format!("file://{}", self.resolve(path).display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFileSystem::new(dir.path());

        fs.write_file("files/s/abc", b"hello").await.unwrap();
        assert_eq!(fs.read_file("files/s/abc").await.unwrap(), b"hello");
        assert!(fs.exists("files/s/abc").await.unwrap());

        let stat = fs.stat("files/s/abc").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_directory);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFileSystem::new(dir.path());

        let err = fs.read_file("files/s/nope").await.unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
        assert!(!fs.exists("files/s/nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFileSystem::new(dir.path());

        fs.write_file("a/b", b"one").await.unwrap();
        fs.write_file("a/b", b"two").await.unwrap();
        assert_eq!(fs.read_file("a/b").await.unwrap(), b"two");

        // No temp file left behind
        let names = fs.read_directory("a").await.unwrap();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFileSystem::new(dir.path());

        fs.write_file("d/one", b"1").await.unwrap();
        fs.write_file("d/two", b"2").await.unwrap();
        assert_eq!(fs.read_directory("d").await.unwrap().len(), 2);

        fs.remove("d/one").await.unwrap();
        assert_eq!(fs.read_directory("d").await.unwrap(), vec!["two"]);
    }

    #[tokio::test]
    async fn test_file_url_shape() {
        let dir = tempfile::tempdir().unwrap();
        let fs = NativeFileSystem::new(dir.path());
        let url = fs.file_url("files/s/abc").unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("files/s/abc"));
    }
}
