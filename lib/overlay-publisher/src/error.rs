use overlay_api::SnapshotError;
use overlay_core::CoreError;
use overlay_topology::TopologyError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to read template {}: {source}", .path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    TemplateRender(#[from] minijinja::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    #[error("Failed to write config {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config written but daemon reload failed: {0}")]
    Reload(#[source] CoreError),

    #[error("Peer routes: {0}")]
    Routes(#[source] CoreError),

    #[error("Block watch channel closed without a stop request")]
    WatchChannelClosed,

    #[error("Block watch failed: {0}")]
    Watch(#[from] TopologyError),
}
