use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_TEMPLATE_FILE: &str = "/etc/bird/bird.conf.t";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/bird/bird.conf";
pub const DEFAULT_PID_FILE: &str = "/var/run/bird.pid";
pub const DEFAULT_LOCAL_AS: u32 = 65534;

/// Static render parameters, fixed for the life of the process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Template for the daemon configuration
    pub template_file: PathBuf,
    /// Where the rendered configuration is written
    pub config_file: PathBuf,
    /// PID file of the daemon to reload
    pub pid_file: PathBuf,
    pub local_as: u32,
    #[serde(default)]
    pub debug: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            template_file: PathBuf::from(DEFAULT_TEMPLATE_FILE),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            local_as: DEFAULT_LOCAL_AS,
            debug: false,
        }
    }
}
