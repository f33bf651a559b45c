//! Router daemon configuration publishing
//!
//! This library provides:
//! - RouterConfigPublisher: renders the BGP daemon config from a snapshot and
//!   signals the daemon to reload
//! - WatchLoop: applies every received snapshot, one at a time
//! - PeerRouteHandler: keeps kernel routes to peer blocks while watching

pub mod config;
pub mod error;
pub mod peers;
pub mod publisher;
pub mod watch;

pub use config::PublisherConfig;
pub use error::{PublishError, Result};
pub use peers::PeerRouteHandler;
pub use publisher::RouterConfigPublisher;
pub use watch::{SnapshotHandler, WatchLoop, WatchStats};
