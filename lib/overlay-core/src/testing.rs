//! Deterministic doubles for the capability ports
//!
//! These never touch the kernel, the real filesystem or other processes, so
//! reconciler behaviour can be asserted from call logs alone.

use crate::exec::render_command;
use crate::{CommandRunner, CoreError, Filesystem, ProcessSignaler, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A command invocation captured by a test runner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
}

impl RecordedCall {
    /// True when the arguments start with `prefix`
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

type Responder = dyn Fn(&str, &[String]) -> Result<Vec<u8>> + Send + Sync;

/// CommandRunner answering every call from a closure
pub struct ScriptedRunner {
    responder: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn exec(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        self.calls.lock().await.push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
        });
        (self.responder)(program, args)
    }
}

/// In-memory kernel route table answering `ip route show` and `ip route add`
#[derive(Default)]
pub struct FakeRouteTable {
    routes: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<RecordedCall>>,
    failing_adds: Mutex<HashSet<String>>,
    fail_queries: AtomicBool,
}

impl FakeRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route as if someone else had created it
    pub async fn insert_route(&self, target: &str, line: &str) {
        self.routes
            .lock()
            .await
            .insert(target.to_string(), line.to_string());
    }

    /// Delete a route behind the reconciler's back
    pub async fn remove_route(&self, target: &str) {
        self.routes.lock().await.remove(target);
    }

    pub async fn routes(&self) -> BTreeMap<String, String> {
        self.routes.lock().await.clone()
    }

    /// Make `ip route add <target>` fail
    pub async fn fail_add_for(&self, target: &str) {
        self.failing_adds.lock().await.insert(target.to_string());
    }

    /// Make every `ip route show` fail
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of `route <verb>` invocations seen so far
    pub async fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(&["route", verb]))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRouteTable {
    async fn exec(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        self.calls.lock().await.push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let failure = |reason: &str| CoreError::ShellExec {
            command: render_command(program, args),
            reason: reason.to_string(),
        };

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        match argv.as_slice() {
            ["route", "show", target] => {
                if self.fail_queries.load(Ordering::SeqCst) {
                    return Err(failure("exit status: 2: Cannot talk to rtnetlink"));
                }
                let routes = self.routes.lock().await;
                Ok(routes
                    .get(*target)
                    .map(|line| format!("{}\n", line).into_bytes())
                    .unwrap_or_default())
            }
            ["route", "add", target, rest @ ..] => {
                if self.failing_adds.lock().await.contains(*target) {
                    return Err(failure("exit status: 2: RTNETLINK answers: Network is unreachable"));
                }
                let mut routes = self.routes.lock().await;
                if routes.contains_key(*target) {
                    return Err(failure("exit status: 2: RTNETLINK answers: File exists"));
                }
                routes.insert(target.to_string(), format!("{} {}", target, rest.join(" ")));
                Ok(Vec::new())
            }
            _ => Err(failure("unsupported command")),
        }
    }
}

/// Filesystem kept entirely in memory
#[derive(Default)]
pub struct MemoryFilesystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    failing_writes: Mutex<HashSet<PathBuf>>,
    atomic_writes: AtomicUsize,
    rewrites: AtomicUsize,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_file(self, path: impl AsRef<Path>, content: &str) -> Self {
        self.with_bytes(path, content.as_bytes()).await
    }

    pub async fn with_bytes(self, path: impl AsRef<Path>, content: &[u8]) -> Self {
        self.files
            .lock()
            .await
            .insert(path.as_ref().to_path_buf(), content.to_vec());
        self
    }

    pub async fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .await
            .get(path.as_ref())
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Fail the next mutating operation on `path`, once
    pub async fn fail_next_write(&self, path: impl AsRef<Path>) {
        self.failing_writes
            .lock()
            .await
            .insert(path.as_ref().to_path_buf());
    }

    pub fn atomic_write_count(&self) -> usize {
        self.atomic_writes.load(Ordering::SeqCst)
    }

    pub fn rewrite_count(&self) -> usize {
        self.rewrites.load(Ordering::SeqCst)
    }

    async fn check_write(&self, path: &Path) -> io::Result<()> {
        if self.failing_writes.lock().await.remove(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected write failure for {}", path.display()),
            ));
        }
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn create_if_missing(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_default();
        Ok(())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn append(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.check_write(path).await?;
        let mut files = self.files.lock().await;
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.extend_from_slice(data);
        Ok(())
    }

    async fn rewrite(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.check_write(path).await?;
        let mut files = self.files.lock().await;
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        *file = data.to_vec();
        self.rewrites.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.check_write(path).await?;
        self.files
            .lock()
            .await
            .insert(path.to_path_buf(), data.to_vec());
        self.atomic_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().await.contains_key(path)
    }
}

/// ProcessSignaler that records reload requests instead of signalling
#[derive(Default)]
pub struct RecordingSignaler {
    reloads: Mutex<Vec<PathBuf>>,
    not_running: AtomicBool,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every subsequent reload as "daemon not running"
    pub fn set_not_running(&self, not_running: bool) {
        self.not_running.store(not_running, Ordering::SeqCst);
    }

    pub async fn reloads(&self) -> Vec<PathBuf> {
        self.reloads.lock().await.clone()
    }
}

#[async_trait]
impl ProcessSignaler for RecordingSignaler {
    async fn reload(&self, pid_file: &Path) -> Result<i32> {
        if self.not_running.load(Ordering::SeqCst) {
            return Err(CoreError::ProcessNotRunning { pid: 1 });
        }
        self.reloads.lock().await.push(pid_file.to_path_buf());
        Ok(1)
    }
}
