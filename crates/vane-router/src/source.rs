//! Pluggable lookup sources and the service bundle rules compile against.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use vane_config::GeositeConfig;

use crate::item::{DomainSet, KeywordSet};
use crate::rule_set::RuleSetRegistry;

/// Country lookup for `geoip`/`source_geoip` conditions.
///
/// Returned codes must be uppercase ISO 3166-1 alpha-2 ("DE", "US"); `None`
/// means the address is not covered by the database.
pub trait GeoIpSource: Send + Sync {
    fn country_code(&self, ip: IpAddr) -> Option<String>;
}

/// Category membership lookup for `geosite` conditions. Codes are matched
/// case-insensitively.
pub trait GeositeSource: Send + Sync {
    fn domain_in_category(&self, domain: &str, code: &str) -> bool;
}

/// Everything rule compilation needs besides the rule options themselves.
///
/// The geo sources are optional; compiling a rule that uses a geo condition
/// without the matching source fails with a field-level error instead of
/// silently never matching.
#[derive(Clone, Default)]
pub struct RouterServices {
    pub rule_sets: Arc<RuleSetRegistry>,
    pub geoip: Option<Arc<dyn GeoIpSource>>,
    pub geosite: Option<Arc<dyn GeositeSource>>,
}

impl fmt::Debug for RouterServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterServices")
            .field("rule_sets", &self.rule_sets)
            .field("geoip", &self.geoip.is_some())
            .field("geosite", &self.geosite.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct CategoryMatcher {
    domains: DomainSet,
    keywords: Option<KeywordSet>,
}

impl CategoryMatcher {
    fn matches(&self, domain: &str) -> bool {
        if self.domains.matches(domain) {
            return true;
        }
        self.keywords.as_ref().is_some_and(|k| k.matches(domain))
    }
}

/// Geosite categories defined inline in the configuration file.
#[derive(Debug, Default)]
pub struct StaticGeosite {
    categories: FxHashMap<String, CategoryMatcher>,
}

impl StaticGeosite {
    pub fn from_config(config: &GeositeConfig) -> Self {
        let mut categories = FxHashMap::default();
        for (code, category) in &config.categories {
            let mut domains = DomainSet::new();
            for domain in &category.domain {
                domains.add_exact(domain);
            }
            for suffix in &category.domain_suffix {
                domains.add_suffix(suffix);
            }
            let keywords = if category.domain_keyword.is_empty() {
                None
            } else {
                Some(KeywordSet::new(&category.domain_keyword))
            };
            categories.insert(
                code.to_ascii_lowercase(),
                CategoryMatcher { domains, keywords },
            );
        }
        Self { categories }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl GeositeSource for StaticGeosite {
    fn domain_in_category(&self, domain: &str, code: &str) -> bool {
        self.categories
            .get(&code.to_ascii_lowercase())
            .is_some_and(|matcher| matcher.matches(domain))
    }
}
