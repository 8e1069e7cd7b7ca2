//! Configuration model and loading.
//!
//! A config file (JSON, YAML or TOML, picked by extension) carries three
//! sections: `log`, `route` (rules, rule-sets, geo databases, final
//! outbound) and `dns` (rules, final server). [`load_config`] reads and
//! parses, [`validate_config`] catches structural mistakes before rules are
//! compiled.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use vane_core::defaults;

mod rule;

pub use rule::{
    DnsRuleConfig, GeoipConfig, GeositeCategory, GeositeConfig, Listable, Prefix, QueryTypeValue,
    RuleConditions, RuleConfig, RuleSetConfig,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub route: RouteConfig,
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<RuleSetConfig>,
    /// Outbound used when no rule matches.
    #[serde(rename = "final", default = "default_final_outbound")]
    pub final_outbound: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoip: Option<GeoipConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geosite: Option<GeositeConfig>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            rule_set: Vec::new(),
            final_outbound: default_final_outbound(),
            geoip: None,
            geosite: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<DnsRuleConfig>,
    /// Server used when no rule matches.
    #[serde(rename = "final", default = "default_final_server")]
    pub final_server: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            final_server: default_final_server(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" => Ok(serde_json::from_str(&data)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

/// Structural checks that do not require compiling rules. Per-condition
/// validation (regexes, CIDRs, port ranges) happens when the router is built.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if let Some(level) = config.log.level.as_deref() {
        let known = ["trace", "debug", "info", "warn", "error"];
        if !known.contains(&level) {
            return Err(ConfigError::Validation(format!(
                "log.level must be one of: {:?}",
                known
            )));
        }
    }
    if config.route.final_outbound.trim().is_empty() {
        return Err(ConfigError::Validation("route.final is empty".into()));
    }
    if config.dns.final_server.trim().is_empty() {
        return Err(ConfigError::Validation("dns.final is empty".into()));
    }
    let mut seen_tags = Vec::new();
    for (i, set) in config.route.rule_set.iter().enumerate() {
        if set.tag.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "route.rule_set[{i}].tag is empty"
            )));
        }
        if seen_tags.contains(&set.tag.as_str()) {
            return Err(ConfigError::Validation(format!(
                "route.rule_set[{i}]: duplicate tag {:?}",
                set.tag
            )));
        }
        seen_tags.push(set.tag.as_str());
        if set.rules.is_empty() {
            return Err(ConfigError::Validation(format!(
                "route.rule_set[{i}].rules is empty"
            )));
        }
    }
    if let Some(geoip) = &config.route.geoip
        && geoip.path.trim().is_empty()
    {
        return Err(ConfigError::Validation("route.geoip.path is empty".into()));
    }
    if let Some(geosite) = &config.route.geosite {
        for code in geosite.categories.keys() {
            if code.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "route.geosite: category code is empty".into(),
                ));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Default Value Functions (for serde)
// ============================================================================

fn default_final_outbound() -> String {
    defaults::DEFAULT_FINAL_OUTBOUND.to_string()
}

fn default_final_server() -> String {
    defaults::DEFAULT_FINAL_DNS_SERVER.to_string()
}
