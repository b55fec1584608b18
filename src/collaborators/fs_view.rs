//! Directory browsing for clients picking release files

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

use crate::protocol::RemoteFile;

/// Read-only view of the server's filesystem
#[async_trait]
pub trait FileSystemView: Send + Sync {
    /// Entries of `path`, or `None` if it is not a readable directory.
    async fn list_directory(&self, path: &str) -> Option<Vec<RemoteFile>>;

    async fn directory_exists(&self, path: &str) -> bool;

    /// Whether a plain file exists at `path`
    async fn file_exists(&self, path: &str) -> bool;
}

/// The local filesystem. Hidden and unreadable entries are skipped.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystemView for LocalFileSystem {
    async fn list_directory(&self, path: &str) -> Option<Vec<RemoteFile>> {
        let mut dir = fs::read_dir(path).await.ok()?;
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            entries.push(RemoteFile {
                path: entry.path().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Some(entries)
    }

    async fn directory_exists(&self, path: &str) -> bool {
        fs::metadata(Path::new(path))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn file_exists(&self, path: &str) -> bool {
        fs::metadata(Path::new(path))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}
