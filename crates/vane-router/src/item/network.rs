//! Transport network and IP version conditions.

use std::fmt;

use vane_core::{ConnContext, IpVersion};

use crate::item::{RuleItem, write_values};

/// The `network` condition group, matched against the request transport.
pub struct NetworkItem {
    networks: Vec<String>,
}

impl NetworkItem {
    pub fn new(networks: &[String]) -> Self {
        Self {
            networks: networks.to_vec(),
        }
    }
}

impl RuleItem for NetworkItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.network
            .is_some_and(|network| self.networks.iter().any(|n| n == network.as_str()))
    }
}

impl fmt::Display for NetworkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "network", &self.networks)
    }
}

/// The `ip_version` condition. Falls back to the version of the known
/// destination address when the request does not carry one explicitly.
pub struct IpVersionItem {
    version: IpVersion,
}

impl IpVersionItem {
    pub fn new(version: IpVersion) -> Self {
        Self { version }
    }
}

impl RuleItem for IpVersionItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let version = ctx
            .ip_version
            .or_else(|| ctx.destination_ip.map(IpVersion::of));
        version == Some(self.version)
    }
}

impl fmt::Display for IpVersionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ip_version={}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use vane_core::Network;

    use super::*;

    #[test]
    fn network_matches_transport() {
        let item = NetworkItem::new(&["tcp".to_string()]);
        let mut ctx = ConnContext::new();
        assert!(!item.matches(&mut ctx));
        ctx.network = Some(Network::Tcp);
        assert!(item.matches(&mut ctx));
        ctx.network = Some(Network::Udp);
        assert!(!item.matches(&mut ctx));
    }

    #[test]
    fn ip_version_prefers_explicit_value() {
        let item = IpVersionItem::new(IpVersion::V4);
        let mut ctx = ConnContext::new();
        ctx.ip_version = Some(IpVersion::V6);
        ctx.destination_ip = Some(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        assert!(!item.matches(&mut ctx));
    }

    #[test]
    fn ip_version_falls_back_to_destination() {
        let item = IpVersionItem::new(IpVersion::V6);
        let mut ctx = ConnContext::new();
        assert!(!item.matches(&mut ctx));
        ctx.destination_ip = Some(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert!(item.matches(&mut ctx));
    }

    #[test]
    fn display_formats() {
        let item = NetworkItem::new(&["tcp".to_string(), "udp".to_string()]);
        assert_eq!(item.to_string(), "network=[tcp udp]");
        assert_eq!(IpVersionItem::new(IpVersion::V4).to_string(), "ip_version=4");
    }
}
