//! Hosts and block assignments as delivered by the topology store

use ipnetwork::{IpNetwork, IpNetworkError};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// Host is a cluster member as known to the topology service.
///
/// Hosts are read-only input to this node: they are assigned upstream and
/// never mutated here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Stable identifier assigned by the topology service
    #[serde(default)]
    pub id: u64,

    /// Human readable host name, also used as the block owner key
    pub name: String,

    /// Management address, used as the gateway for routes to this host
    pub ip: IpAddr,

    /// Overlay CIDR of the host, kept unparsed as received
    #[serde(alias = "romanaIp")]
    pub romana_ip: String,

    /// Port the host agent listens on
    #[serde(default)]
    pub agent_port: u16,
}

impl Host {
    /// Parse the overlay CIDR of this host
    pub fn overlay_cidr(&self) -> Result<IpNetwork, IpNetworkError> {
        self.romana_ip.parse()
    }
}

/// NetworkBlock is an allocatable CIDR owned by exactly one host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBlock {
    /// Block prefix
    pub cidr: IpNetwork,

    /// Name of the owning host
    pub host: String,

    /// Management address of the owning host
    pub host_ip: IpAddr,
}

impl NetworkBlock {
    pub fn new(cidr: IpNetwork, host: impl Into<String>, host_ip: IpAddr) -> Self {
        Self {
            cidr,
            host: host.into(),
            host_ip,
        }
    }

    /// The block as `network/prefix` with host bits cleared
    pub fn network_cidr(&self) -> String {
        format!("{}/{}", self.cidr.network(), self.cidr.prefix())
    }

    pub fn is_owned_by(&self, host: &str) -> bool {
        self.host == host
    }

    /// View the block as a peer host whose overlay CIDR is the block itself.
    pub fn as_peer_host(&self) -> Host {
        Host {
            id: 0,
            name: self.host.clone(),
            ip: self.host_ip,
            romana_ip: self.cidr.to_string(),
            agent_port: 0,
        }
    }

    fn overlaps(&self, other: &NetworkBlock) -> bool {
        self.cidr.contains(other.cidr.network()) || other.cidr.contains(self.cidr.network())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("blocks {first} ({first_owner}) and {second} ({second_owner}) overlap")]
    Overlap {
        first: IpNetwork,
        first_owner: String,
        second: IpNetwork,
        second_owner: String,
    },
}

/// BlockSnapshot carries the complete set of blocks at one point in time.
///
/// Every snapshot is the full desired state, never a delta.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    #[serde(default)]
    pub blocks: Vec<NetworkBlock>,
}

impl BlockSnapshot {
    pub fn new(blocks: Vec<NetworkBlock>) -> Self {
        Self { blocks }
    }

    /// Check that no two blocks overlap.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (i, first) in self.blocks.iter().enumerate() {
            for second in self.blocks.iter().skip(i + 1) {
                if first.overlaps(second) {
                    return Err(SnapshotError::Overlap {
                        first: first.cidr,
                        first_owner: first.host.clone(),
                        second: second.cidr,
                        second_owner: second.host.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Blocks owned by any host other than `local_host`, in address order
    pub fn foreign_blocks(&self, local_host: &str) -> Vec<&NetworkBlock> {
        let mut foreign: Vec<&NetworkBlock> = self
            .blocks
            .iter()
            .filter(|block| !block.is_owned_by(local_host))
            .collect();
        foreign.sort_by_key(|block| (block.cidr.ip(), block.cidr.prefix()));
        foreign
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(cidr: &str, host: &str, ip: &str) -> NetworkBlock {
        NetworkBlock::new(cidr.parse().unwrap(), host, ip.parse().unwrap())
    }

    #[test]
    fn test_foreign_blocks_excludes_local_host() {
        let snapshot = BlockSnapshot::new(vec![
            block("10.2.0.0/16", "host-c", "192.168.0.3"),
            block("10.0.0.0/16", "host-a", "192.168.0.1"),
            block("10.1.0.0/16", "host-b", "192.168.0.2"),
        ]);

        let foreign = snapshot.foreign_blocks("host-a");
        let cidrs: Vec<String> = foreign.iter().map(|b| b.cidr.to_string()).collect();
        assert_eq!(cidrs, vec!["10.1.0.0/16", "10.2.0.0/16"]);
    }

    #[test]
    fn test_network_cidr_clears_host_bits() {
        assert_eq!(block("10.1.2.3/16", "host-b", "192.168.0.2").network_cidr(), "10.1.0.0/16");
        assert_eq!(block("10.1.0.0/16", "host-b", "192.168.0.2").network_cidr(), "10.1.0.0/16");
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let snapshot = BlockSnapshot::new(vec![
            block("10.1.0.0/16", "host-b", "192.168.0.2"),
            block("10.1.4.0/24", "host-c", "192.168.0.3"),
        ]);

        match snapshot.validate() {
            Err(SnapshotError::Overlap { first_owner, second_owner, .. }) => {
                assert_eq!(first_owner, "host-b");
                assert_eq!(second_owner, "host-c");
            }
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_adjacent_blocks() {
        let snapshot = BlockSnapshot::new(vec![
            block("10.1.0.0/24", "host-b", "192.168.0.2"),
            block("10.1.1.0/24", "host-c", "192.168.0.3"),
        ]);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_snapshot_from_yaml() {
        let yaml = r#"
blocks:
  - cidr: 10.1.0.0/16
    host: host-b
    host_ip: 192.168.0.2
"#;
        let snapshot: BlockSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.blocks[0].host, "host-b");
        assert_eq!(snapshot.blocks[0].cidr.prefix(), 16);
    }

    #[test]
    fn test_peer_host_from_block() {
        let peer = block("10.1.0.0/16", "host-b", "192.168.0.2").as_peer_host();
        assert_eq!(peer.name, "host-b");
        assert_eq!(peer.overlay_cidr().unwrap().to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_host_overlay_cidr_parse_failure() {
        let host = Host {
            id: 7,
            name: "host-z".to_string(),
            ip: "192.168.0.9".parse().unwrap(),
            romana_ip: "not-a-cidr".to_string(),
            agent_port: 9604,
        };
        assert!(host.overlay_cidr().is_err());
    }
}
