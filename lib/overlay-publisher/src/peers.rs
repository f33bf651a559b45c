//! Kernel routes to peer blocks, driven by the watch loop

use crate::{PublishError, Result, SnapshotHandler};
use async_trait::async_trait;
use overlay_api::{BlockSnapshot, Host};
use overlay_core::RouteReconciler;
use std::sync::Arc;
use tracing::info;

/// Ensures a gateway route to every block owned by another host
pub struct PeerRouteHandler {
    routes: Arc<RouteReconciler>,
}

impl PeerRouteHandler {
    pub fn new(routes: Arc<RouteReconciler>) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl SnapshotHandler for PeerRouteHandler {
    fn name(&self) -> &'static str {
        "peer-routes"
    }

    async fn apply(&self, snapshot: &BlockSnapshot, local_host: &str) -> Result<()> {
        let peers: Vec<Host> = snapshot
            .foreign_blocks(local_host)
            .into_iter()
            .map(|block| block.as_peer_host())
            .collect();

        let report = self
            .routes
            .ensure_inter_host_routes(&peers)
            .await
            .map_err(PublishError::Routes)?;
        if !report.created.is_empty() {
            info!(created = report.created.len(), "Added routes to peer blocks");
        }
        Ok(())
    }
}
