//! Watching block assignments

use crate::{Result, StopSignal, TopologyError};
use async_trait::async_trait;
use overlay_api::BlockSnapshot;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// BlockWatcher delivers complete block snapshots.
///
/// The returned channel yields at least one snapshot per change. Duplicates
/// and late deliveries are allowed. Once `stop` fires, delivery ends and the
/// channel is closed.
#[async_trait]
pub trait BlockWatcher: Send + Sync {
    async fn watch_blocks(&self, stop: StopSignal) -> Result<mpsc::Receiver<BlockSnapshot>>;
}

/// Load a snapshot from a YAML or JSON file
pub async fn load_snapshot(path: &Path) -> Result<BlockSnapshot> {
    let data = tokio::fs::read(path).await.map_err(|source| TopologyError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_slice(&data).map_err(|e| e.to_string()),
        _ => serde_yaml::from_slice(&data).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| TopologyError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Polls a blocks file and emits a snapshot whenever its content changes.
///
/// An unchanged snapshot is re-sent every `resync_interval` so consumers get
/// another chance after a failed apply.
#[derive(Clone, Debug)]
pub struct FileBlockWatcher {
    path: PathBuf,
    poll_interval: Duration,
    resync_interval: Duration,
    capacity: usize,
}

impl FileBlockWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(5),
            resync_interval: Duration::from_secs(300),
            capacity: 4,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    async fn run(
        self,
        initial: BlockSnapshot,
        tx: mpsc::Sender<BlockSnapshot>,
        mut stop: StopSignal,
    ) {
        let mut last = initial.clone();
        let mut last_sent = Instant::now();
        if tx.send(initial).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    info!(path = %self.path.display(), "Block watcher stopped");
                    break;
                }
                _ = time::sleep(self.poll_interval) => {}
            }

            let snapshot = match load_snapshot(&self.path).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping poll: {}", e);
                    continue;
                }
            };

            let changed = snapshot != last;
            if !changed && last_sent.elapsed() < self.resync_interval {
                continue;
            }

            debug!(blocks = snapshot.len(), changed, "Delivering block snapshot");
            if tx.send(snapshot.clone()).await.is_err() {
                debug!("Snapshot receiver dropped");
                break;
            }
            last = snapshot;
            last_sent = Instant::now();
        }
    }
}

#[async_trait]
impl BlockWatcher for FileBlockWatcher {
    async fn watch_blocks(&self, stop: StopSignal) -> Result<mpsc::Receiver<BlockSnapshot>> {
        let initial = load_snapshot(&self.path).await?;
        info!(
            path = %self.path.display(),
            blocks = initial.len(),
            "Watching blocks file"
        );

        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(self.clone().run(initial, tx, stop));
        Ok(rx)
    }
}
