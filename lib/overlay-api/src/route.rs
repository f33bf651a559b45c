//! Route intents derived from endpoints and peer hosts
//!
//! A [`RouteIntent`] is recomputed on every reconciliation pass and never
//! stored.

use crate::{Host, NetIf};
use ipnetwork::{IpNetwork, IpNetworkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// How traffic for a destination leaves this host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NextHop {
    /// Directly out of a local interface, optionally with a preferred source
    Device { name: String, source: Option<IpAddr> },
    /// Through another host's management address
    Gateway { via: IpAddr },
}

/// RouteIntent is a desired kernel route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteIntent {
    pub destination: IpNetwork,
    pub next_hop: NextHop,
}

impl RouteIntent {
    /// Device route to a local endpoint, using `prefix` as the endpoint netmask.
    pub fn for_endpoint(
        netif: &NetIf,
        prefix: u8,
        gateway: IpAddr,
    ) -> Result<Self, IpNetworkError> {
        Ok(Self {
            destination: IpNetwork::new(netif.ip, prefix)?,
            next_hop: NextHop::Device {
                name: netif.name.clone(),
                source: Some(gateway),
            },
        })
    }

    /// Gateway route to a peer host's overlay CIDR via its management address.
    pub fn for_peer(host: &Host) -> Result<Self, IpNetworkError> {
        let cidr = host.overlay_cidr()?;
        Ok(Self {
            destination: IpNetwork::new(cidr.network(), cidr.prefix())?,
            next_hop: NextHop::Gateway { via: host.ip },
        })
    }

    /// Destination as `address/prefix`, the form `ip route` expects
    pub fn target(&self) -> String {
        format!("{}/{}", self.destination.ip(), self.destination.prefix())
    }
}

impl fmt::Display for RouteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.next_hop {
            NextHop::Device { name, source: Some(src) } => {
                write!(f, "{} dev {} src {}", self.target(), name, src)
            }
            NextHop::Device { name, source: None } => write!(f, "{} dev {}", self.target(), name),
            NextHop::Gateway { via } => write!(f, "{} via {}", self.target(), via),
        }
    }
}
