//! IP address conditions.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use vane_core::ConnContext;

use crate::item::{RuleItem, write_values};
use crate::source::GeoIpSource;

/// Which address of the request an IP condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpScope {
    Source,
    Destination,
}

/// CIDR containment over sorted, deduplicated prefix lists. Lookup is a
/// linear scan; containment checks cannot use plain binary search.
#[derive(Debug)]
struct CidrMatcher {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

impl CidrMatcher {
    fn new(nets: &[IpNet]) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for net in nets {
            match net {
                IpNet::V4(n) => v4.push(*n),
                IpNet::V6(n) => v6.push(*n),
            }
        }
        v4.sort();
        v4.dedup();
        v6.sort();
        v6.dedup();
        Self { v4, v6 }
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(addr) => self.v4.iter().any(|net| net.contains(&addr)),
            IpAddr::V6(addr) => self.v6.iter().any(|net| net.contains(&addr)),
        }
    }
}

/// The `ip_cidr`/`source_ip_cidr` condition groups, and via [`private`] the
/// `ip_is_private`/`source_ip_is_private` groups.
///
/// Destination matching follows the request's address knowledge: a literal
/// destination IP decides alone; otherwise any resolved address may match;
/// with no address at all the rule-set accept-empty flag decides. The
/// rule-set match-source flag redirects a destination condition to the
/// source address for the duration of a bundle evaluation.
///
/// [`private`]: IpCidrItem::private
pub struct IpCidrItem {
    scope: IpScope,
    matcher: CidrMatcher,
    nets: Vec<IpNet>,
    is_private: bool,
}

impl IpCidrItem {
    pub fn new(nets: Vec<IpNet>, scope: IpScope) -> Self {
        Self {
            scope,
            matcher: CidrMatcher::new(&nets),
            nets,
            is_private: false,
        }
    }

    /// RFC 1918 ranges plus IPv6 unique-local addresses.
    pub fn private(scope: IpScope) -> Self {
        let nets: Vec<IpNet> = vec![
            "10.0.0.0/8".parse().expect("valid prefix"),
            "172.16.0.0/12".parse().expect("valid prefix"),
            "192.168.0.0/16".parse().expect("valid prefix"),
            "fc00::/7".parse().expect("valid prefix"),
        ];
        Self {
            scope,
            matcher: CidrMatcher::new(&nets),
            nets,
            is_private: true,
        }
    }
}

impl RuleItem for IpCidrItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        if self.scope == IpScope::Source || ctx.rule_set_matches_source_ip() {
            return ctx.source_ip.is_some_and(|ip| self.matcher.contains(ip));
        }
        if let Some(ip) = ctx.destination_ip {
            return self.matcher.contains(ip);
        }
        if !ctx.destination_addresses.is_empty() {
            return ctx
                .destination_addresses
                .iter()
                .any(|ip| self.matcher.contains(*ip));
        }
        ctx.rule_set_accepts_empty_ip()
    }
}

impl fmt::Display for IpCidrItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_private {
            return match self.scope {
                IpScope::Source => f.write_str("source_ip_is_private=true"),
                IpScope::Destination => f.write_str("ip_is_private=true"),
            };
        }
        let key = match self.scope {
            IpScope::Source => "source_ip_cidr",
            IpScope::Destination => "ip_cidr",
        };
        write_values(f, key, &self.nets)
    }
}

/// The `geoip`/`source_geoip` condition groups: country membership of an
/// address per the configured geoip source.
///
/// Lookups against a single known address go through the request's rule
/// cache so sibling conditions in one rule reuse them; lookups over a
/// resolved address list are not memoized.
pub struct GeoIpItem {
    scope: IpScope,
    codes: Vec<String>,
    source: Arc<dyn GeoIpSource>,
}

impl GeoIpItem {
    pub fn new(codes: &[String], scope: IpScope, source: Arc<dyn GeoIpSource>) -> Self {
        let codes = codes.iter().map(|c| c.to_ascii_uppercase()).collect();
        Self {
            scope,
            codes,
            source,
        }
    }

    fn code_matches(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

impl RuleItem for GeoIpItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        match self.scope {
            IpScope::Source => {
                if let Some(memo) = ctx.cache().source_country() {
                    return memo.is_some_and(|code| self.code_matches(code));
                }
                let Some(ip) = ctx.source_ip else {
                    return false;
                };
                let code = self.source.country_code(ip);
                let matched = code.as_deref().is_some_and(|c| self.code_matches(c));
                ctx.cache_mut().set_source_country(code);
                matched
            }
            IpScope::Destination => {
                if let Some(ip) = ctx.destination_ip {
                    if let Some(memo) = ctx.cache().destination_country() {
                        return memo.is_some_and(|code| self.code_matches(code));
                    }
                    let code = self.source.country_code(ip);
                    let matched = code.as_deref().is_some_and(|c| self.code_matches(c));
                    ctx.cache_mut().set_destination_country(code);
                    return matched;
                }
                ctx.destination_addresses.iter().any(|&ip| {
                    self.source
                        .country_code(ip)
                        .is_some_and(|code| self.code_matches(&code))
                })
            }
        }
    }
}

impl fmt::Display for GeoIpItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self.scope {
            IpScope::Source => "source_geoip",
            IpScope::Destination => "geoip",
        };
        write_values(f, key, &self.codes)
    }
}
