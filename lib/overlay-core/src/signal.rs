//! Reload signalling for daemons identified by PID file or process name

use crate::{CommandRunner, CoreError, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use tracing::{debug, info};

/// ProcessSignaler asks a daemon to reload its configuration
#[async_trait]
pub trait ProcessSignaler: Send + Sync {
    /// Read the PID from `pid_file` and deliver a reload signal.
    /// Returns the PID that was signalled.
    async fn reload(&self, pid_file: &Path) -> Result<i32>;
}

/// Sends SIGHUP to the process named in a PID file
#[derive(Clone, Debug, Default)]
pub struct PidFileSignaler;

impl PidFileSignaler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSignaler for PidFileSignaler {
    async fn reload(&self, pid_file: &Path) -> Result<i32> {
        let content = tokio::fs::read_to_string(pid_file)
            .await
            .map_err(|source| CoreError::PidFileRead {
                path: pid_file.to_path_buf(),
                source,
            })?;
        let pid = parse_pid(pid_file, &content)?;
        signal_reload(pid)?;
        Ok(pid)
    }
}

/// Parse the content of a PID file
pub fn parse_pid(pid_file: &Path, content: &str) -> Result<i32> {
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(CoreError::PidFileParse {
            path: pid_file.to_path_buf(),
            content: content.trim().to_string(),
        }),
    }
}

/// Deliver SIGHUP to `pid`
pub fn signal_reload(pid: i32) -> Result<()> {
    match kill(Pid::from_raw(pid), Signal::SIGHUP) {
        Ok(()) => {
            info!(pid, "Sent SIGHUP");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(CoreError::ProcessNotRunning { pid }),
        Err(source) => Err(CoreError::SignalDelivery { pid, source }),
    }
}

/// Find the PID of a single running process by its command name.
///
/// Uses `ps -C <name> -o pid --no-headers`; fails when no process or more
/// than one process matches.
pub async fn lookup_pid(runner: &dyn CommandRunner, process_name: &str) -> Result<i32> {
    let args = vec![
        "-C".to_string(),
        process_name.to_string(),
        "-o".to_string(),
        "pid".to_string(),
        "--no-headers".to_string(),
    ];
    let out = runner.exec("ps", &args).await.map_err(|e| CoreError::ProcessLookup {
        name: process_name.to_string(),
        reason: e.to_string(),
    })?;

    let text = String::from_utf8_lossy(&out);
    let pids: Vec<&str> = text.split_whitespace().collect();
    debug!(process = process_name, ?pids, "Process lookup");

    match pids.as_slice() {
        [single] => match single.parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(pid),
            _ => Err(CoreError::ProcessLookup {
                name: process_name.to_string(),
                reason: format!("unexpected pid {:?}", single),
            }),
        },
        [] => Err(CoreError::ProcessLookup {
            name: process_name.to_string(),
            reason: "no matching process".to_string(),
        }),
        many => Err(CoreError::ProcessLookup {
            name: process_name.to_string(),
            reason: format!("{} matching processes", many.len()),
        }),
    }
}
