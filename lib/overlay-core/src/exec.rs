//! Process execution port

use crate::{CoreError, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// CommandRunner executes external programs on behalf of the reconcilers.
///
/// Arguments are passed through in order. A non-zero exit status is an error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and return its standard output
    async fn exec(&self, program: &str, args: &[String]) -> Result<Vec<u8>>;
}

/// Runs commands on the host via `tokio::process`
#[derive(Clone, Debug, Default)]
pub struct HostCommandRunner;

impl HostCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn exec(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        debug!("Executing {}", render_command(program, args));

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CoreError::ShellExec {
                command: render_command(program, args),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::ShellExec {
                command: render_command(program, args),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(output.stdout)
    }
}

/// Format a command line for logs and errors
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
