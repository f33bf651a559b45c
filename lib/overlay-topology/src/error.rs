use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TopologyError>;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Failed to read blocks from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse blocks in {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },
}
