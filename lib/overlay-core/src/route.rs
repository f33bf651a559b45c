//! Kernel route reconciliation for local endpoints and peer hosts
//!
//! Both operations are stateless: every call re-reads the live route table
//! through the [`CommandRunner`] port, so routes deleted externally are
//! recreated on the next call. Each operation class holds its own lock for
//! the whole inspect-then-mutate sequence.

use crate::{CommandRunner, CoreError, Result};
use ipnetwork::IpNetwork;
use overlay_api::{Host, NetIf, NextHop, RouteIntent};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_IP_BINARY: &str = "/sbin/ip";

/// Result of looking a route up in the kernel table
#[derive(Debug)]
pub enum RouteState {
    Exists,
    Absent,
    QueryFailed(CoreError),
}

/// A peer whose route could not be ensured
#[derive(Debug)]
pub struct PeerRouteFailure {
    pub host: String,
    pub error: CoreError,
}

/// Outcome of one inter-host pass
#[derive(Debug, Default)]
pub struct InterHostReport {
    /// Peer CIDRs that are routed after the pass
    pub ensured: Vec<IpNetwork>,
    /// Subset of `ensured` created during this pass
    pub created: Vec<IpNetwork>,
    pub failures: Vec<PeerRouteFailure>,
}

impl InterHostReport {
    pub fn total(&self) -> usize {
        self.ensured.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// RouteReconciler keeps kernel routes in line with endpoints and peers
pub struct RouteReconciler {
    runner: Arc<dyn CommandRunner>,
    ip_binary: String,
    endpoint_prefix: u8,
    gateway: IpAddr,
    endpoint_lock: Mutex<()>,
    inter_host_lock: Mutex<()>,
}

impl RouteReconciler {
    /// Create a reconciler.
    ///
    /// `endpoint_prefix` is the netmask used for endpoint routes and
    /// `gateway` the local overlay gateway used as their source address.
    pub fn new(runner: Arc<dyn CommandRunner>, endpoint_prefix: u8, gateway: IpAddr) -> Self {
        Self {
            runner,
            ip_binary: DEFAULT_IP_BINARY.to_string(),
            endpoint_prefix,
            gateway,
            endpoint_lock: Mutex::new(()),
            inter_host_lock: Mutex::new(()),
        }
    }

    pub fn with_ip_binary(mut self, ip_binary: impl Into<String>) -> Self {
        self.ip_binary = ip_binary.into();
        self
    }

    /// Look up `target` (`address/prefix`); empty output means absent.
    pub async fn route_state(&self, target: &str) -> RouteState {
        let args = vec!["route".to_string(), "show".to_string(), target.to_string()];
        match self.runner.exec(&self.ip_binary, &args).await {
            Ok(out) if out.iter().any(|b| !b.is_ascii_whitespace()) => RouteState::Exists,
            Ok(_) => RouteState::Absent,
            Err(e) => RouteState::QueryFailed(e),
        }
    }

    async fn create_route(&self, intent: &RouteIntent) -> Result<()> {
        info!(route = %intent, "Creating route");
        let mut args = vec!["route".to_string(), "add".to_string(), intent.target()];
        match &intent.next_hop {
            NextHop::Device { name, source } => {
                args.push("dev".to_string());
                args.push(name.clone());
                if let Some(src) = source {
                    args.push("src".to_string());
                    args.push(src.to_string());
                }
            }
            NextHop::Gateway { via } => {
                args.push("via".to_string());
                args.push(via.to_string());
            }
        }
        self.runner.exec(&self.ip_binary, &args).await.map(|_| ())
    }

    /// Ensure `intent` is present: query, then create when absent.
    /// Returns true when a route was created.
    async fn ensure(&self, intent: &RouteIntent) -> Result<bool> {
        let target = intent.target();
        match self.route_state(&target).await {
            RouteState::Exists => {
                debug!(route = %intent, "Route already present");
                Ok(false)
            }
            RouteState::Absent => {
                self.create_route(intent)
                    .await
                    .map_err(|e| CoreError::RouteCreate {
                        route: intent.to_string(),
                        source: Box::new(e),
                    })?;
                Ok(true)
            }
            RouteState::QueryFailed(e) => Err(CoreError::RouteQuery {
                target,
                source: Box::new(e),
            }),
        }
    }

    /// Ensure a device route to a local endpoint exists.
    pub async fn ensure_endpoint_route(&self, netif: &NetIf) -> Result<()> {
        debug!(ip = %netif.ip, iface = %netif.name, "Ensuring endpoint route");
        let intent = RouteIntent::for_endpoint(netif, self.endpoint_prefix, self.gateway)
            .map_err(|e| CoreError::CidrParse {
                host: netif.name.clone(),
                cidr: format!("{}/{}", netif.ip, self.endpoint_prefix),
                reason: e.to_string(),
            })?;

        debug!("Acquiring endpoint route lock");
        let _guard = self.endpoint_lock.lock().await;
        debug!("Acquired endpoint route lock");

        let result = self.ensure(&intent).await.map(|_| ());
        debug!("Releasing endpoint route lock");
        result
    }

    /// Ensure a gateway route exists to every peer's overlay CIDR.
    ///
    /// All peers are processed even when some fail; if any failed the
    /// returned error carries the full report.
    pub async fn ensure_inter_host_routes(&self, peers: &[Host]) -> Result<InterHostReport> {
        debug!("Acquiring inter-host route lock");
        let _guard = self.inter_host_lock.lock().await;
        debug!(peers = peers.len(), "Acquired inter-host route lock");

        let mut report = InterHostReport::default();
        for host in peers {
            debug!(host = %host.name, cidr = %host.romana_ip, "Ensuring route to peer");
            let intent = match RouteIntent::for_peer(host) {
                Ok(intent) => intent,
                Err(e) => {
                    warn!(host = %host.name, cidr = %host.romana_ip, "Skipping peer with invalid CIDR");
                    report.failures.push(PeerRouteFailure {
                        host: host.name.clone(),
                        error: CoreError::CidrParse {
                            host: host.name.clone(),
                            cidr: host.romana_ip.clone(),
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            match self.ensure(&intent).await {
                Ok(created) => {
                    if created {
                        report.created.push(intent.destination);
                    }
                    report.ensured.push(intent.destination);
                }
                Err(error) => {
                    warn!(host = %host.name, "Failed to ensure peer route: {}", error);
                    report.failures.push(PeerRouteFailure {
                        host: host.name.clone(),
                        error,
                    });
                }
            }
        }

        debug!("Releasing inter-host route lock");
        if report.is_complete() {
            Ok(report)
        } else {
            Err(CoreError::InterHostRoutes(Box::new(report)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRouteTable;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Route table whose `show` for one target waits until released
    struct GatedRouteTable {
        table: FakeRouteTable,
        gated_target: String,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CommandRunner for GatedRouteTable {
        async fn exec(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
            if args.len() == 3 && args[1] == "show" && args[2] == self.gated_target {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.table.exec(program, args).await
        }
    }

    fn reconciler(table: &Arc<FakeRouteTable>) -> RouteReconciler {
        RouteReconciler::new(table.clone(), 16, "10.0.0.1".parse().unwrap())
    }

    fn peer(name: &str, ip: &str, cidr: &str) -> Host {
        Host {
            id: 0,
            name: name.to_string(),
            ip: ip.parse().unwrap(),
            romana_ip: cidr.to_string(),
            agent_port: 9604,
        }
    }

    #[tokio::test]
    async fn test_endpoint_route_is_idempotent() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = reconciler(&table);
        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());

        routes.ensure_endpoint_route(&netif).await.unwrap();
        routes.ensure_endpoint_route(&netif).await.unwrap();

        assert_eq!(table.count("add").await, 1);
        assert_eq!(table.count("show").await, 2);

        let calls = table.calls().await;
        let add = calls.iter().find(|c| c.starts_with(&["route", "add"])).unwrap();
        assert_eq!(add.program, "/sbin/ip");
        assert_eq!(
            add.args,
            vec!["route", "add", "10.0.0.5/16", "dev", "veth0", "src", "10.0.0.1"]
        );
        assert_eq!(table.routes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_endpoint_route_recreated_after_external_delete() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = reconciler(&table);
        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());

        routes.ensure_endpoint_route(&netif).await.unwrap();
        table.remove_route("10.0.0.5/16").await;
        routes.ensure_endpoint_route(&netif).await.unwrap();

        assert_eq!(table.count("add").await, 2);
        assert!(table.routes().await.contains_key("10.0.0.5/16"));
    }

    #[tokio::test]
    async fn test_endpoint_route_query_failure_does_not_create() {
        let table = Arc::new(FakeRouteTable::new());
        table.fail_queries(true);
        let routes = reconciler(&table);
        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());

        let err = routes.ensure_endpoint_route(&netif).await.unwrap_err();
        assert!(matches!(err, CoreError::RouteQuery { .. }));
        assert_eq!(table.count("add").await, 0);
    }

    #[tokio::test]
    async fn test_endpoint_route_create_failure() {
        let table = Arc::new(FakeRouteTable::new());
        table.fail_add_for("10.0.0.5/16").await;
        let routes = reconciler(&table);
        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());

        let err = routes.ensure_endpoint_route(&netif).await.unwrap_err();
        assert!(matches!(err, CoreError::RouteCreate { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_endpoint_calls_create_once() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = Arc::new(reconciler(&table));
        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let routes = routes.clone();
            let netif = netif.clone();
            handles.push(tokio::spawn(async move {
                routes.ensure_endpoint_route(&netif).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(table.count("add").await, 1);
        assert_eq!(table.count("show").await, 8);
    }

    #[tokio::test]
    async fn test_concurrent_inter_host_calls_create_each_route_once() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = Arc::new(reconciler(&table));
        let peers = vec![
            peer("host-b", "192.168.0.2", "10.1.0.0/16"),
            peer("host-c", "192.168.0.3", "10.2.0.0/16"),
            peer("host-d", "192.168.0.4", "10.3.0.0/16"),
        ];

        let mut handles = Vec::new();
        for i in 0..6 {
            let routes = routes.clone();
            let mut peers = peers.clone();
            let n = peers.len();
            peers.rotate_left(i % n);
            handles.push(tokio::spawn(async move {
                routes.ensure_inter_host_routes(&peers).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            assert_eq!(report.ensured.len(), 3);
            created += report.created.len();
        }

        assert_eq!(created, 3);
        assert_eq!(table.count("add").await, 3);
        assert_eq!(table.routes().await.len(), 3);
    }

    #[tokio::test]
    async fn test_endpoint_route_not_blocked_by_inter_host_pass() {
        let runner = Arc::new(GatedRouteTable {
            table: FakeRouteTable::new(),
            gated_target: "10.1.0.0/16".to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let routes = Arc::new(RouteReconciler::new(
            runner.clone(),
            16,
            "10.0.0.1".parse().unwrap(),
        ));

        let inter_host = {
            let routes = routes.clone();
            tokio::spawn(async move {
                routes
                    .ensure_inter_host_routes(&[peer("host-b", "192.168.0.2", "10.1.0.0/16")])
                    .await
            })
        };
        runner.entered.notified().await;

        let netif = NetIf::new("veth0", "10.0.0.5".parse().unwrap());
        tokio::time::timeout(Duration::from_secs(5), routes.ensure_endpoint_route(&netif))
            .await
            .expect("endpoint route waited on the inter-host lock")
            .unwrap();
        assert!(!inter_host.is_finished());

        runner.release.notify_one();
        let report = inter_host.await.unwrap().unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(runner.table.count("add").await, 2);
    }

    #[tokio::test]
    async fn test_inter_host_routes_created_via_peer() {
        let table = Arc::new(FakeRouteTable::new());
        table
            .insert_route("10.2.0.0/16", "10.2.0.0/16 via 192.168.0.3")
            .await;
        let routes = reconciler(&table);

        let report = routes
            .ensure_inter_host_routes(&[
                peer("host-b", "192.168.0.2", "10.1.0.0/16"),
                peer("host-c", "192.168.0.3", "10.2.0.0/16"),
            ])
            .await
            .unwrap();

        assert_eq!(report.ensured.len(), 2);
        assert_eq!(report.created.len(), 1);
        let calls = table.calls().await;
        let add = calls.iter().find(|c| c.starts_with(&["route", "add"])).unwrap();
        assert_eq!(
            add.args,
            vec!["route", "add", "10.1.0.0/16", "via", "192.168.0.2"]
        );
    }

    #[tokio::test]
    async fn test_inter_host_routes_continue_past_bad_peer() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = reconciler(&table);

        let err = routes
            .ensure_inter_host_routes(&[
                peer("host-b", "192.168.0.2", "10.1.0.0/16"),
                peer("host-x", "192.168.0.9", "10.300.0.0/16"),
                peer("host-c", "192.168.0.3", "10.2.0.0/16"),
            ])
            .await
            .unwrap_err();

        match err {
            CoreError::InterHostRoutes(report) => {
                assert_eq!(report.ensured.len(), 2);
                assert_eq!(report.failures.len(), 1);
                assert_eq!(report.failures[0].host, "host-x");
                assert!(matches!(report.failures[0].error, CoreError::CidrParse { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(table.count("add").await, 2);
        assert_eq!(table.routes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_inter_host_routes_empty_peer_list() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = reconciler(&table);
        let report = routes.ensure_inter_host_routes(&[]).await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(table.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_ip_binary() {
        let table = Arc::new(FakeRouteTable::new());
        let routes = reconciler(&table).with_ip_binary("/usr/sbin/ip");
        assert!(matches!(routes.route_state("10.9.0.0/16").await, RouteState::Absent));
        assert_eq!(table.calls().await[0].program, "/usr/sbin/ip");
    }
}
