//! Level-triggered watch loop over block snapshots

use crate::{PublishError, Result};
use async_trait::async_trait;
use overlay_api::BlockSnapshot;
use overlay_topology::StopSignal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// SnapshotHandler derives local state from a complete snapshot.
///
/// Implementations must be idempotent: the same snapshot may arrive more
/// than once, and an older one may follow a newer one.
#[async_trait]
pub trait SnapshotHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, snapshot: &BlockSnapshot, local_host: &str) -> Result<()>;
}

/// Counters returned when the loop ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub received: u64,
    pub applied: u64,
    pub failed: u64,
}

/// WatchLoop feeds every received snapshot to its handlers, in order.
pub struct WatchLoop {
    local_host: String,
    handlers: Vec<Arc<dyn SnapshotHandler>>,
}

impl WatchLoop {
    pub fn new(local_host: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn SnapshotHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Apply one snapshot with every handler. Handlers run independently;
    /// returns false if any of them failed.
    pub async fn apply(&self, snapshot: &BlockSnapshot) -> bool {
        let mut ok = true;
        for handler in &self.handlers {
            if let Err(e) = handler.apply(snapshot, &self.local_host).await {
                error!(handler = handler.name(), "Failed to apply snapshot: {}", e);
                ok = false;
            }
        }
        ok
    }

    /// Consume snapshots until the channel closes.
    ///
    /// Closing after `stop` fired is a normal shutdown. Closing without a
    /// stop request means the source is gone and is reported as
    /// [`PublishError::WatchChannelClosed`].
    pub async fn run(
        &self,
        mut snapshots: mpsc::Receiver<BlockSnapshot>,
        stop: &StopSignal,
    ) -> Result<WatchStats> {
        info!(host = %self.local_host, handlers = self.handlers.len(), "Starting watch loop");
        let mut stats = WatchStats::default();

        while let Some(snapshot) = snapshots.recv().await {
            stats.received += 1;
            let started = Instant::now();

            if self.apply(&snapshot).await {
                stats.applied += 1;
            } else {
                stats.failed += 1;
            }

            debug!(
                blocks = snapshot.len(),
                elapsed = ?started.elapsed(),
                "Snapshot processed"
            );
        }

        if stop.is_stopped() {
            info!(?stats, "Watch loop stopped");
            Ok(stats)
        } else {
            error!(?stats, "Block watch channel closed unexpectedly");
            Err(PublishError::WatchChannelClosed)
        }
    }
}
