//! Process settings read from `OVERLAY_*` environment variables

use anyhow::{anyhow, Context, Result};
use overlay_publisher::PublisherConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BLOCKS_FILE: &str = "/var/lib/overlay/blocks.yaml";

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub publisher: PublisherConfig,
    /// Name of this host in the topology store
    pub hostname: String,
    pub blocks_file: PathBuf,
    pub poll_interval: Duration,
    pub resync_interval: Duration,
    /// Also install kernel routes to peer blocks
    pub install_routes: bool,
    /// Netmask for endpoint routes
    pub endpoint_prefix: u8,
    /// Source address for endpoint routes
    pub gateway: IpAddr,
    pub json_logs: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PublisherConfig::default();
        let publisher = PublisherConfig {
            template_file: lookup("OVERLAY_TEMPLATE")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_file),
            config_file: lookup("OVERLAY_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_file),
            pid_file: lookup("OVERLAY_PID_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.pid_file),
            local_as: parse_or(&lookup, "OVERLAY_LOCAL_AS", defaults.local_as)?,
            debug: lookup("OVERLAY_DEBUG").map(|v| is_enabled(&v)).unwrap_or(false),
        };

        let hostname = match lookup("OVERLAY_HOSTNAME").filter(|h| !h.is_empty()) {
            Some(hostname) => hostname,
            None => nix::unistd::gethostname()
                .context("Failed to read hostname")?
                .into_string()
                .map_err(|raw| anyhow!("Hostname is not valid UTF-8: {:?}", raw))?,
        };

        Ok(Self {
            publisher,
            hostname,
            blocks_file: lookup("OVERLAY_BLOCKS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOCKS_FILE)),
            poll_interval: Duration::from_secs(parse_or(&lookup, "OVERLAY_POLL_INTERVAL_SECS", 5)?),
            resync_interval: Duration::from_secs(parse_or(
                &lookup,
                "OVERLAY_RESYNC_INTERVAL_SECS",
                300,
            )?),
            install_routes: lookup("OVERLAY_INSTALL_ROUTES")
                .map(|v| is_enabled(&v))
                .unwrap_or(false),
            endpoint_prefix: parse_or(&lookup, "OVERLAY_ENDPOINT_PREFIX", 32)?,
            gateway: parse_or(&lookup, "OVERLAY_GATEWAY", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            json_logs: lookup("OVERLAY_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid value {:?} for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

/// "yes" or "true", in any case, turn a switch on
fn is_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true")
}
