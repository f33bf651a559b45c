//! Presence or absence of single lines in lease allow-list files

use crate::{CoreError, Filesystem, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOp {
    Add,
    Remove,
}

impl fmt::Display for LineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineOp::Add => write!(f, "add"),
            LineOp::Remove => write!(f, "remove"),
        }
    }
}

/// LineReconciler ensures a token line is present in, or absent from, a file.
///
/// One lock covers every file handled by a reconciler.
pub struct LineReconciler {
    fs: Arc<dyn Filesystem>,
    lock: Mutex<()>,
}

impl LineReconciler {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            lock: Mutex::new(()),
        }
    }

    pub async fn ensure_line(&self, path: &Path, token: &str, op: LineOp) -> Result<()> {
        if token.contains(['\n', '\r']) {
            return Err(CoreError::InvalidLeaseToken {
                token: token.to_string(),
            });
        }

        let io_err = |source: std::io::Error| CoreError::LeaseFileIo {
            path: path.to_path_buf(),
            source,
        };

        self.fs.create_if_missing(path).await.map_err(io_err)?;

        debug!("Acquiring lease line lock");
        let _guard = self.lock.lock().await;
        debug!("Acquired lease line lock");

        let content = self.fs.read(path).await.map_err(io_err)?;
        let present = lines(&content).any(|line| line == token.as_bytes());

        match (op, present) {
            (LineOp::Add, false) => {
                let mut line = Vec::with_capacity(token.len() + 2);
                if !content.is_empty() && !content.ends_with(b"\n") {
                    line.push(b'\n');
                }
                line.extend_from_slice(token.as_bytes());
                line.push(b'\n');
                self.fs.append(path, &line).await.map_err(io_err)?;
                debug!(path = %path.display(), token, "Appended line");
            }
            (LineOp::Remove, true) => {
                let mut kept = Vec::with_capacity(content.len());
                for line in lines(&content).filter(|line| *line != token.as_bytes()) {
                    kept.extend_from_slice(line);
                    kept.push(b'\n');
                }
                self.fs.rewrite(path, &kept).await.map_err(io_err)?;
                debug!(path = %path.display(), token, "Removed line");
            }
            _ => debug!(path = %path.display(), token, %op, "Line already in desired state"),
        }

        debug!("Releasing lease line lock");
        Ok(())
    }
}

/// Lines of `content` split on `\n` only; any `\r` stays part of the line.
fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split_inclusive(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\n").unwrap_or(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryFilesystem;
    use crate::{Filesystem, HostFilesystem};
    use std::path::PathBuf;

    const LEASES: &str = "/etc/overlay/leases";

    async fn reconciler_with(content: Option<&str>) -> (Arc<MemoryFilesystem>, LineReconciler) {
        let fs = MemoryFilesystem::new();
        let fs = match content {
            Some(content) => fs.with_file(LEASES, content).await,
            None => fs,
        };
        let fs = Arc::new(fs);
        (fs.clone(), LineReconciler::new(fs))
    }

    #[tokio::test]
    async fn test_add_twice_yields_single_line() {
        let (fs, lines) = reconciler_with(None).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "X", LineOp::Add).await.unwrap();
        lines.ensure_line(&path, "X", LineOp::Add).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), "X\n");
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_content() {
        let before = "aa:bb:cc:dd:ee:01\naa:bb:cc:dd:ee:02\n";
        let (fs, lines) = reconciler_with(Some(before)).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "token1", LineOp::Add).await.unwrap();
        assert!(fs.contents(LEASES).await.unwrap().ends_with("token1\n"));
        lines.ensure_line(&path, "token1", LineOp::Remove).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_absent_token_leaves_file_untouched() {
        let before = "alpha\nbeta";
        let (fs, lines) = reconciler_with(Some(before)).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "token1", LineOp::Remove).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), before);
        assert_eq!(fs.rewrite_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_drops_every_exact_match_only() {
        let (fs, lines) = reconciler_with(Some("X\nXY\nX\nY\n")).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "X", LineOp::Remove).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), "XY\nY\n");
    }

    #[tokio::test]
    async fn test_substring_does_not_count_as_present() {
        let (fs, lines) = reconciler_with(Some("token10\n")).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "token1", LineOp::Add).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), "token10\ntoken1\n");
    }

    #[tokio::test]
    async fn test_add_repairs_missing_trailing_newline() {
        let (fs, lines) = reconciler_with(Some("alpha")).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "beta", LineOp::Add).await.unwrap();

        assert_eq!(fs.contents(LEASES).await.unwrap(), "alpha\nbeta\n");
    }

    #[tokio::test]
    async fn test_remove_keeps_other_lines_byte_for_byte() {
        let fs = Arc::new(
            MemoryFilesystem::new()
                .with_bytes(LEASES, b"caf\xe9\ntoken1\nwin\r\n")
                .await,
        );
        let lines = LineReconciler::new(fs.clone());
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "token1", LineOp::Remove).await.unwrap();

        assert_eq!(fs.read(&path).await.unwrap(), b"caf\xe9\nwin\r\n");
    }

    #[tokio::test]
    async fn test_crlf_line_is_not_an_exact_match() {
        let (fs, lines) = reconciler_with(Some("token1\r\n")).await;
        let path = PathBuf::from(LEASES);

        lines.ensure_line(&path, "token1", LineOp::Remove).await.unwrap();
        assert_eq!(fs.rewrite_count(), 0);

        lines.ensure_line(&path, "token1", LineOp::Add).await.unwrap();
        assert_eq!(fs.contents(LEASES).await.unwrap(), "token1\r\ntoken1\n");
    }

    #[tokio::test]
    async fn test_multiline_token_is_rejected() {
        let (fs, lines) = reconciler_with(Some("alpha\n")).await;
        let path = PathBuf::from(LEASES);

        for token in ["a\nb", "a\r"] {
            let err = lines.ensure_line(&path, token, LineOp::Add).await.unwrap_err();
            assert!(matches!(err, CoreError::InvalidLeaseToken { .. }));
        }
        assert_eq!(fs.contents(LEASES).await.unwrap(), "alpha\n");
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (fs, lines) = reconciler_with(Some("")).await;
        fs.fail_next_write(LEASES).await;
        let path = PathBuf::from(LEASES);

        let err = lines.ensure_line(&path, "X", LineOp::Add).await.unwrap_err();
        assert!(matches!(err, CoreError::LeaseFileIo { .. }));

        lines.ensure_line(&path, "X", LineOp::Add).await.unwrap();
        assert_eq!(fs.contents(LEASES).await.unwrap(), "X\n");
    }

    #[tokio::test]
    async fn test_concurrent_adds_on_host_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases");
        let lines = Arc::new(LineReconciler::new(Arc::new(HostFilesystem::new())));

        let mut handles = Vec::new();
        for i in 0..16 {
            let lines = lines.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let token = format!("token{}", i % 4);
                lines.ensure_line(&path, &token, LineOp::Add).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let mut found: Vec<&str> = content.lines().collect();
        found.sort();
        assert_eq!(found, vec!["token0", "token1", "token2", "token3"]);
    }
}
