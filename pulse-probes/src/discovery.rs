//! Host network identity for the dashboard
//!
//! Lists the IPv4 addresses a browser on the LAN could use to reach the
//! monitoring service, along with hostname and platform.

use crate::Result;
use if_addrs::{get_if_addrs, IfAddr};
use serde::Serialize;
use tracing::debug;

/// One reachable address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceAddress {
    pub interface: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub addresses: Vec<InterfaceAddress>,
    pub hostname: String,
    pub platform: String,
}

impl NetworkInfo {
    /// Enumerate non-internal IPv4 addresses
    pub fn discover() -> Result<Self> {
        let candidates = get_if_addrs()?
            .into_iter()
            .filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) => Some((iface.name, v4.ip)),
                IfAddr::V6(_) => None,
            })
            .collect::<Vec<_>>();

        let addresses = external_ipv4(candidates);
        debug!(count = addresses.len(), "network addresses enumerated");

        Ok(Self {
            addresses,
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            platform: std::env::consts::OS.to_string(),
        })
    }
}

fn external_ipv4(candidates: Vec<(String, std::net::Ipv4Addr)>) -> Vec<InterfaceAddress> {
    candidates
        .into_iter()
        .filter(|(_, ip)| !ip.is_loopback() && !ip.is_unspecified())
        .map(|(name, ip)| InterfaceAddress {
            interface: name,
            address: ip.to_string(),
        })
        .collect()
}
