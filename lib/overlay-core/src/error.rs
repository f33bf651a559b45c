use crate::route::InterHostReport;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Command `{command}` failed: {reason}")]
    ShellExec { command: String, reason: String },

    #[error("Failed to query route {target}: {source}")]
    RouteQuery {
        target: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Failed to create route {route}: {source}")]
    RouteCreate {
        route: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Invalid overlay CIDR {cidr:?} for host {host}: {reason}")]
    CidrParse {
        host: String,
        cidr: String,
        reason: String,
    },

    #[error("Inter-host routes incomplete: {} of {} peers failed", .0.failures.len(), .0.total())]
    InterHostRoutes(Box<InterHostReport>),

    #[error("Lease file {} error: {source}", .path.display())]
    LeaseFileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Lease token {token:?} must be a single line")]
    InvalidLeaseToken { token: String },

    #[error("Failed to read pid file {}: {source}", .path.display())]
    PidFileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid pid in {}: {content:?}", .path.display())]
    PidFileParse { path: PathBuf, content: String },

    #[error("Process {pid} is not running")]
    ProcessNotRunning { pid: i32 },

    #[error("Failed to signal process {pid}: {source}")]
    SignalDelivery {
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Could not find process {name}: {reason}")]
    ProcessLookup { name: String, reason: String },
}

impl CoreError {
    /// True when the target daemon is simply not running
    pub fn is_not_running(&self) -> bool {
        matches!(self, CoreError::ProcessNotRunning { .. })
    }
}
