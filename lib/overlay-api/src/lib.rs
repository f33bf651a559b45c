//! Overlay network data model
//!
//! This library defines the values exchanged between the topology store and
//! the node-local reconcilers:
//! - Host: a cluster member and its overlay CIDR
//! - NetworkBlock / BlockSnapshot: block-to-host assignments, delivered whole
//! - NetIf: a local endpoint interface
//! - RouteIntent: a derived, never-persisted kernel route

pub mod endpoint;
pub mod route;
pub mod topology;

pub use endpoint::NetIf;
pub use route::{NextHop, RouteIntent};
pub use topology::{BlockSnapshot, Host, NetworkBlock, SnapshotError};
