//! Block snapshot sources
pub mod error;
pub mod stop;
pub mod watcher;

pub use error::{Result, TopologyError};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use watcher::{load_snapshot, BlockWatcher, FileBlockWatcher};
