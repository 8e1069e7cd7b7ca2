//! Rule option types shared by the route and DNS sections.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// A list-valued option that also accepts a bare scalar.
///
/// `"domain_suffix": "example.com"` and `"domain_suffix": ["example.com"]`
/// deserialize identically; a one-element list serializes back to the scalar
/// form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listable<T>(pub Vec<T>);

impl<T> Default for Listable<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Listable<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Deref for Listable<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> From<Vec<T>> for Listable<T> {
    fn from(values: Vec<T>) -> Self {
        Self(values)
    }
}

impl<'a, T> IntoIterator for &'a Listable<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Listable<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany<T> {
            Many(Vec<T>),
            One(T),
        }
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::Many(values) => Self(values),
            OneOrMany::One(value) => Self(vec![value]),
        })
    }
}

impl<T: Serialize> Serialize for Listable<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}

/// An IP prefix that also accepts a bare address (`"10.0.0.1"` means
/// `10.0.0.1/32`, likewise `/128` for IPv6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix(pub IpNet);

impl FromStr for Prefix {
    type Err = ipnet::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<IpAddr>() {
            Ok(ip) => Ok(Self(IpNet::from(ip))),
            Err(_) => s.parse::<IpNet>().map(Self),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Prefix {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

/// A DNS record type given either by mnemonic (`"A"`, `"HTTPS"`) or by its
/// numeric value (`28`). Resolution to a concrete type happens when the rule
/// is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum QueryTypeValue {
    Number(u16),
    Name(String),
}

/// The condition groups recognized by both route and DNS rules.
///
/// Every group is optional; a rule must set at least one. List-valued groups
/// accept a scalar or an array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub inbound: Listable<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<u8>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub query_type: Listable<QueryTypeValue>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub network: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub auth_user: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub protocol: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_suffix: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_keyword: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_regex: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub geosite: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub source_geoip: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub geoip: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub source_ip_cidr: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub ip_cidr: Listable<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub source_ip_is_private: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ip_is_private: bool,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub source_port: Listable<u16>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub source_port_range: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub port: Listable<u16>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub port_range: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub process_name: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub process_path: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub process_path_regex: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub package_name: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub user: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub user_id: Listable<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clash_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub wifi_ssid: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub wifi_bssid: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub rule_set: Listable<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rule_set_ip_cidr_match_source: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rule_set_ip_cidr_accept_empty: bool,
}

impl RuleConditions {
    /// True when no condition group is set. The two `rule_set_ip_cidr_*`
    /// flags modify how a `rule_set` group matches and do not count as
    /// conditions on their own.
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty()
            && self.ip_version.is_none()
            && self.query_type.is_empty()
            && self.network.is_empty()
            && self.auth_user.is_empty()
            && self.protocol.is_empty()
            && self.domain.is_empty()
            && self.domain_suffix.is_empty()
            && self.domain_keyword.is_empty()
            && self.domain_regex.is_empty()
            && self.geosite.is_empty()
            && self.source_geoip.is_empty()
            && self.geoip.is_empty()
            && self.source_ip_cidr.is_empty()
            && self.ip_cidr.is_empty()
            && !self.source_ip_is_private
            && !self.ip_is_private
            && self.source_port.is_empty()
            && self.source_port_range.is_empty()
            && self.port.is_empty()
            && self.port_range.is_empty()
            && self.process_name.is_empty()
            && self.process_path.is_empty()
            && self.process_path_regex.is_empty()
            && self.package_name.is_empty()
            && self.user.is_empty()
            && self.user_id.is_empty()
            && self.clash_mode.is_none()
            && self.wifi_ssid.is_empty()
            && self.wifi_bssid.is_empty()
            && self.rule_set.is_empty()
    }
}

/// One route rule: conditions plus the outbound it selects.
///
/// `type` is `"default"` (may be omitted) or `"logical"`; logical rules use
/// `mode` and `rules` instead of inline conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(flatten)]
    pub conditions: RuleConditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleConfig>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
}

/// One DNS rule: conditions plus the server it selects and the response
/// metadata it attaches.
///
/// Unlike route rules, `outbound` here is a condition (the outbound already
/// chosen for the triggering connection, `"any"` matching all); the action
/// tag is `server`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsRuleConfig {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(flatten)]
    pub conditions: RuleConditions,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub outbound: Listable<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<DnsRuleConfig>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_subnet: Option<Prefix>,
}

/// A named bundle of condition-only rules referenced by `rule_set`
/// conditions. Bundle rules carry no outbound and may not nest further
/// `rule_set` conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub tag: String,
    pub rules: Vec<RuleConfig>,
}

/// MaxMind country database used by `geoip`/`source_geoip` conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoipConfig {
    pub path: String,
}

/// Domain categories used by `geosite` conditions, declared inline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeositeConfig {
    #[serde(flatten)]
    pub categories: BTreeMap<String, GeositeCategory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeositeCategory {
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_suffix: Listable<String>,
    #[serde(default, skip_serializing_if = "Listable::is_empty")]
    pub domain_keyword: Listable<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}
