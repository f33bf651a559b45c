//! Rendering and publishing the BGP daemon configuration

use crate::{PublishError, PublisherConfig, Result, SnapshotHandler};
use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior};
use overlay_api::BlockSnapshot;
use overlay_core::{Filesystem, ProcessSignaler};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TEMPLATE_NAME: &str = "router-config";

/// A foreign block as seen by the template
#[derive(Clone, Debug, Serialize)]
struct BlockEntry {
    cidr: String,
    network: String,
    prefix: u8,
    host: String,
    host_ip: String,
}

/// A peer host owning at least one foreign block
#[derive(Clone, Debug, Serialize)]
struct PeerEntry {
    host: String,
    host_ip: String,
}

#[derive(Debug, Serialize)]
struct RenderContext<'a> {
    local_host: &'a str,
    local_as: u32,
    debug: bool,
    blocks: Vec<BlockEntry>,
    peers: Vec<PeerEntry>,
}

fn template_environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// RouterConfigPublisher turns a snapshot into daemon configuration.
///
/// Every publish is a full overwrite, so applying an old snapshot after a
/// newer one is harmless and the next snapshot always fully replaces it.
pub struct RouterConfigPublisher {
    config: PublisherConfig,
    template: String,
    env: Environment<'static>,
    fs: Arc<dyn Filesystem>,
    signaler: Arc<dyn ProcessSignaler>,
}

impl RouterConfigPublisher {
    /// Load and compile the template named in `config`.
    pub async fn new(
        config: PublisherConfig,
        fs: Arc<dyn Filesystem>,
        signaler: Arc<dyn ProcessSignaler>,
    ) -> Result<Self> {
        let raw = fs
            .read(&config.template_file)
            .await
            .map_err(|source| PublishError::TemplateRead {
                path: config.template_file.clone(),
                source,
            })?;
        let template = String::from_utf8_lossy(&raw).into_owned();

        let compiler = template_environment();
        compiler.template_from_named_str(TEMPLATE_NAME, &template)?;

        info!(
            template = %config.template_file.display(),
            output = %config.config_file.display(),
            local_as = config.local_as,
            "Router config publisher ready"
        );

        Ok(Self {
            config,
            template,
            env: template_environment(),
            fs,
            signaler,
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Render the configuration for `snapshot` as seen from `local_host`.
    pub fn render(&self, snapshot: &BlockSnapshot, local_host: &str) -> Result<String> {
        snapshot.validate()?;

        let foreign = snapshot.foreign_blocks(local_host);
        let blocks: Vec<BlockEntry> = foreign
            .iter()
            .map(|block| BlockEntry {
                cidr: block.network_cidr(),
                network: block.cidr.network().to_string(),
                prefix: block.cidr.prefix(),
                host: block.host.clone(),
                host_ip: block.host_ip.to_string(),
            })
            .collect();

        let mut peers: BTreeMap<String, PeerEntry> = BTreeMap::new();
        for block in &foreign {
            peers.entry(block.host.clone()).or_insert_with(|| PeerEntry {
                host: block.host.clone(),
                host_ip: block.host_ip.to_string(),
            });
        }

        let ctx = RenderContext {
            local_host,
            local_as: self.config.local_as,
            debug: self.config.debug,
            blocks,
            peers: peers.into_values().collect(),
        };
        debug!(blocks = ctx.blocks.len(), peers = ctx.peers.len(), "Rendering router config");

        Ok(self.env.render_named_str(TEMPLATE_NAME, &self.template, &ctx)?)
    }

    /// Render, atomically replace the config file, then reload the daemon.
    ///
    /// Nothing is written when rendering fails. A failed reload leaves the
    /// new file in place.
    pub async fn publish(&self, snapshot: &BlockSnapshot, local_host: &str) -> Result<()> {
        let rendered = self.render(snapshot, local_host)?;

        self.fs
            .write_atomic(&self.config.config_file, rendered.as_bytes())
            .await
            .map_err(|source| PublishError::ConfigWrite {
                path: self.config.config_file.clone(),
                source,
            })?;
        info!(
            path = %self.config.config_file.display(),
            bytes = rendered.len(),
            "Router config written"
        );

        match self.signaler.reload(&self.config.pid_file).await {
            Ok(pid) => {
                info!(pid, "Router daemon reloaded");
                Ok(())
            }
            Err(e) => {
                if e.is_not_running() {
                    warn!("Router daemon is not running, config will apply on start");
                }
                Err(PublishError::Reload(e))
            }
        }
    }
}

#[async_trait]
impl SnapshotHandler for RouterConfigPublisher {
    fn name(&self) -> &'static str {
        "router-config"
    }

    async fn apply(&self, snapshot: &BlockSnapshot, local_host: &str) -> Result<()> {
        self.publish(snapshot, local_host).await
    }
}
