//! Local endpoint interfaces
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// NetIf is a container/pod interface attached to this host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIf {
    /// Host-side interface name, e.g. "veth0"
    pub name: String,
    /// Address allocated to the endpoint
    pub ip: IpAddr,
    /// Namespace the endpoint belongs to, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl NetIf {
    pub fn new(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            namespace: None,
        }
    }
}
