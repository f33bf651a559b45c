//! Node-local reconciliation of kernel routes and lease files
//!
//! This library provides:
//! - Capability ports for process execution, filesystem access and signalling
//! - Route reconciler for endpoint and inter-host routes
//! - Line reconciler for lease allow-list files
//! - Deterministic test doubles for all ports

pub mod error;
pub mod exec;
pub mod fs;
pub mod iface;
pub mod lease;
pub mod route;
pub mod signal;
pub mod testing;

pub use error::{CoreError, Result};
pub use exec::{CommandRunner, HostCommandRunner};
pub use fs::{Filesystem, HostFilesystem};
pub use iface::InterfaceWaiter;
pub use lease::{LineOp, LineReconciler};
pub use route::{InterHostReport, PeerRouteFailure, RouteReconciler, RouteState};
pub use signal::{lookup_pid, signal_reload, PidFileSignaler, ProcessSignaler};
