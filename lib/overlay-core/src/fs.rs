//! Filesystem port used by the line reconciler and the config publisher

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task;
use tracing::debug;

/// Filesystem exposes the few file primitives the reconcilers need.
///
/// Errors are plain `io::Error`; callers wrap them into their own error kinds.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create an empty file at `path` unless one already exists
    async fn create_if_missing(&self, path: &Path) -> io::Result<()>;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    async fn append(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Overwrite an existing file in place: write `data` from the start,
    /// truncate to its length and sync.
    async fn rewrite(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Replace `path` so readers see either the old or the new content,
    /// never a partial write.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Filesystem backed by the host via `tokio::fs`
#[derive(Clone, Debug, Default)]
pub struct HostFilesystem;

impl HostFilesystem {
    pub fn new() -> Self {
        Self
    }
}

/// Write `data` to a temp file next to `path`, sync it, rename it over
/// `path`, then sync the directory so the rename survives a crash.
fn replace_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(parent)?;
    debug!("Staging {} via {}", path.display(), staged.path().display());
    staged.write_all(data)?;
    staged.flush()?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;

    std::fs::File::open(parent)?.sync_all()
}

#[async_trait]
impl Filesystem for HostFilesystem {
    async fn create_if_missing(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map(|_| ())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn append(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(path).await?;
        file.write_all(data).await?;
        file.flush().await
    }

    async fn rewrite(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.set_len(data.len() as u64).await?;
        file.sync_all().await
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let path = path.to_path_buf();
        let data = data.to_vec();
        task::spawn_blocking(move || replace_file(&path, &data))
            .await
            .map_err(io::Error::other)?
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}
