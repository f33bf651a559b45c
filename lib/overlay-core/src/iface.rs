//! Waiting for endpoint interfaces to appear

use crate::Filesystem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

pub const DEFAULT_SYSFS_NET: &str = "/sys/class/net";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polls for a network interface with a fixed interval between attempts
pub struct InterfaceWaiter {
    fs: Arc<dyn Filesystem>,
    sysfs_root: PathBuf,
    interval: Duration,
}

impl InterfaceWaiter {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_NET),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Wait until `name` exists, checking at most `max_tries` times.
    ///
    /// Names that are empty or would leave the sysfs directory never match.
    pub async fn wait_for_interface(&self, name: &str, max_tries: u32) -> bool {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            warn!(iface = name, "Invalid interface name");
            return false;
        }

        let path = self.sysfs_root.join(name);
        for attempt in 1..=max_tries {
            debug!(iface = name, attempt, "Waiting for interface");
            if self.fs.exists(&path).await {
                info!(iface = name, attempt, "Interface is up");
                return true;
            }
            if attempt < max_tries {
                time::sleep(self.interval).await;
            }
        }
        warn!(iface = name, max_tries, "Interface did not appear");
        false
    }
}
