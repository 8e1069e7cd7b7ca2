//! The router: ordered rule lists, decisions, and hot reload.

use std::fmt;
#[cfg(feature = "geoip")]
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use ipnet::IpNet;
use serde::Serialize;
use tracing::debug;

use vane_config::{Config, DnsRuleConfig, RuleConfig, RuleSetConfig};
use vane_core::ConnContext;
use vane_core::defaults::{DEFAULT_FINAL_DNS_SERVER, DEFAULT_FINAL_OUTBOUND};

use crate::dns::DnsRule;
use crate::error::RuleError;
#[cfg(feature = "geoip")]
use crate::geoip::MaxMindSource;
use crate::rule::Rule;
use crate::rule_set::{RuleSet, RuleSetRegistry};
use crate::source::{GeoIpSource, GeositeSource, RouterServices, StaticGeosite};

/// Outcome of routing one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    /// The outbound tag to dial through.
    pub outbound: String,
    /// Position of the matched rule, `None` for the final fallback.
    pub rule_index: Option<usize>,
}

/// Outcome of selecting a DNS server for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsDecision {
    /// The server tag to resolve through.
    pub server: String,
    /// Position of the matched rule, `None` for the final fallback.
    pub rule_index: Option<usize>,
    pub disable_cache: bool,
    pub rewrite_ttl: Option<u32>,
    pub client_subnet: Option<IpNet>,
    /// The matched rule has destination-IP conditions that were skipped in
    /// this phase; confirm with [`Router::check_dns_addresses`] once the
    /// candidate server has produced addresses.
    pub needs_destination_check: bool,
}

/// Compiled routing tables: route rules, DNS rules, and the registry of
/// rule-set bundles they reference.
///
/// Send + Sync, designed to be shared via `Arc<Router>` or [`HotRouter`].
pub struct Router {
    rules: Vec<Rule>,
    dns_rules: Vec<DnsRule>,
    final_outbound: String,
    final_server: String,
    rule_sets: Arc<RuleSetRegistry>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Build a router straight from a loaded configuration file.
    pub fn from_config(config: &Config) -> Result<Self, RuleError> {
        let mut builder = Router::builder();
        for rule_set in &config.route.rule_set {
            builder.rule_set(rule_set.clone());
        }
        for rule in &config.route.rules {
            builder.rule(rule.clone());
        }
        for rule in &config.dns.rules {
            builder.dns_rule(rule.clone());
        }
        builder.final_outbound(config.route.final_outbound.as_str());
        builder.final_server(config.dns.final_server.as_str());
        if let Some(geoip) = &config.route.geoip {
            #[cfg(feature = "geoip")]
            builder.geoip_source(Arc::new(MaxMindSource::from_file(Path::new(&geoip.path))?));
            #[cfg(not(feature = "geoip"))]
            {
                let _ = geoip;
                tracing::warn!(
                    "geoip database configured but the 'geoip' feature is not enabled; \
                     geoip conditions will fail to build"
                );
            }
        }
        if let Some(geosite) = &config.route.geosite {
            builder.geosite_source(Arc::new(StaticGeosite::from_config(geosite)));
        }
        builder.build()
    }

    /// Route a connection. Rules are evaluated in order; the first match
    /// wins. If no rule matches, the final outbound is returned.
    pub fn route(&self, ctx: &mut ConnContext) -> RouteDecision {
        let started = Instant::now();
        for (index, rule) in self.rules.iter().enumerate() {
            ctx.reset_rule_cache();
            if rule.matches(ctx) {
                let outbound = rule.outbound().unwrap_or(&self.final_outbound).to_string();
                vane_metrics::record_route_decision(&outbound);
                vane_metrics::record_match_duration(started.elapsed().as_secs_f64());
                debug!(rule = %rule, index, outbound = %outbound, "route rule matched");
                return RouteDecision {
                    outbound,
                    rule_index: Some(index),
                };
            }
        }
        vane_metrics::record_route_final();
        vane_metrics::record_match_duration(started.elapsed().as_secs_f64());
        RouteDecision {
            outbound: self.final_outbound.clone(),
            rule_index: None,
        }
    }

    /// Select a DNS server for a query. Destination-IP conditions are
    /// skipped in this phase; the decision says whether they must be
    /// confirmed after resolution.
    pub fn route_dns(&self, ctx: &mut ConnContext) -> DnsDecision {
        self.route_dns_from(0, ctx)
    }

    /// Like [`route_dns`], starting at rule position `start`. Used to move
    /// past a rule whose post-resolution check rejected its addresses.
    ///
    /// [`route_dns`]: Router::route_dns
    pub fn route_dns_from(&self, start: usize, ctx: &mut ConnContext) -> DnsDecision {
        for (index, rule) in self.dns_rules.iter().enumerate().skip(start) {
            ctx.reset_rule_cache();
            if rule.matches(ctx) {
                let needs_destination_check = rule.contains_destination_ip_rules();
                let server = rule.server().unwrap_or(&self.final_server).to_string();
                vane_metrics::record_dns_decision(&server);
                if needs_destination_check {
                    vane_metrics::record_dns_deferred();
                }
                debug!(
                    rule = %rule,
                    index,
                    server = %server,
                    deferred = needs_destination_check,
                    "dns rule matched"
                );
                return DnsDecision {
                    server,
                    rule_index: Some(index),
                    disable_cache: rule.disable_cache(),
                    rewrite_ttl: rule.rewrite_ttl(),
                    client_subnet: rule.client_subnet(),
                    needs_destination_check,
                };
            }
        }
        vane_metrics::record_dns_final();
        DnsDecision {
            server: self.final_server.clone(),
            rule_index: None,
            disable_cache: false,
            rewrite_ttl: None,
            client_subnet: None,
            needs_destination_check: false,
        }
    }

    /// Re-check the DNS rule at `index` with resolved addresses on the
    /// context, over its full conjunction. Out-of-range indices report
    /// false.
    pub fn check_dns_addresses(&self, index: usize, ctx: &mut ConnContext) -> bool {
        self.dns_rules.get(index).is_some_and(|rule| {
            ctx.reset_rule_cache();
            rule.matches_with_destination(ctx)
        })
    }

    pub fn rule_sets(&self) -> &Arc<RuleSetRegistry> {
        &self.rule_sets
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn dns_rule_count(&self) -> usize {
        self.dns_rules.len()
    }

    pub fn final_outbound(&self) -> &str {
        &self.final_outbound
    }

    pub fn final_server(&self) -> &str {
        &self.final_server
    }

    /// The compiled route rules, in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The compiled DNS rules, in evaluation order.
    pub fn dns_rules(&self) -> &[DnsRule] {
        &self.dns_rules
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("rules", &self.rules.len())
            .field("dns_rules", &self.dns_rules.len())
            .field("rule_sets", &self.rule_sets.len())
            .field("final_outbound", &self.final_outbound)
            .field("final_server", &self.final_server)
            .finish()
    }
}

// ── Builder ──

/// Builder for constructing a [`Router`].
pub struct RouterBuilder {
    rules: Vec<RuleConfig>,
    dns_rules: Vec<DnsRuleConfig>,
    rule_sets: Vec<RuleSetConfig>,
    final_outbound: Option<String>,
    final_server: Option<String>,
    geoip: Option<Arc<dyn GeoIpSource>>,
    geosite: Option<Arc<dyn GeositeSource>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            dns_rules: Vec::new(),
            rule_sets: Vec::new(),
            final_outbound: None,
            final_server: None,
            geoip: None,
            geosite: None,
        }
    }

    /// Append a route rule.
    pub fn rule(&mut self, rule: RuleConfig) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Append a DNS rule.
    pub fn dns_rule(&mut self, rule: DnsRuleConfig) -> &mut Self {
        self.dns_rules.push(rule);
        self
    }

    /// Register a rule-set bundle.
    pub fn rule_set(&mut self, rule_set: RuleSetConfig) -> &mut Self {
        self.rule_sets.push(rule_set);
        self
    }

    /// Set the fallback outbound for unmatched connections.
    pub fn final_outbound(&mut self, outbound: impl Into<String>) -> &mut Self {
        self.final_outbound = Some(outbound.into());
        self
    }

    /// Set the fallback server for unmatched queries.
    pub fn final_server(&mut self, server: impl Into<String>) -> &mut Self {
        self.final_server = Some(server.into());
        self
    }

    /// Set the source consulted by `geoip`/`source_geoip` conditions.
    pub fn geoip_source(&mut self, source: Arc<dyn GeoIpSource>) -> &mut Self {
        self.geoip = Some(source);
        self
    }

    /// Set the source consulted by `geosite` conditions.
    pub fn geosite_source(&mut self, source: Arc<dyn GeositeSource>) -> &mut Self {
        self.geosite = Some(source);
        self
    }

    /// Compile everything. Bundles are compiled and registered first so
    /// rules can reference them; every error carries the position or tag of
    /// the offending rule.
    pub fn build(self) -> Result<Router, RuleError> {
        let registry = Arc::new(RuleSetRegistry::new());
        let services = RouterServices {
            rule_sets: registry.clone(),
            geoip: self.geoip,
            geosite: self.geosite,
        };

        let mut bundles = Vec::with_capacity(self.rule_sets.len());
        for config in &self.rule_sets {
            let set = RuleSet::compile(&config.tag, &config.rules, &services).map_err(|err| {
                RuleError::InRuleSet {
                    tag: config.tag.clone(),
                    source: Box::new(err),
                }
            })?;
            debug!(tag = %config.tag, rules = set.len(), "compiled rule-set");
            bundles.push(set);
        }
        registry.replace_all(bundles);

        let mut rules = Vec::with_capacity(self.rules.len());
        for (index, config) in self.rules.iter().enumerate() {
            let rule = Rule::new(config, &services, true, true).map_err(|err| err.in_rule(index))?;
            rules.push(rule);
        }

        let mut dns_rules = Vec::with_capacity(self.dns_rules.len());
        for (index, config) in self.dns_rules.iter().enumerate() {
            let rule = DnsRule::new(config, &services, true).map_err(|err| RuleError::DnsRule {
                index,
                source: Box::new(err),
            })?;
            dns_rules.push(rule);
        }

        debug!(
            rules = rules.len(),
            dns_rules = dns_rules.len(),
            rule_sets = registry.len(),
            "compiled router"
        );

        Ok(Router {
            rules,
            dns_rules,
            final_outbound: self
                .final_outbound
                .unwrap_or_else(|| DEFAULT_FINAL_OUTBOUND.to_string()),
            final_server: self
                .final_server
                .unwrap_or_else(|| DEFAULT_FINAL_DNS_SERVER.to_string()),
            rule_sets: registry,
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Hot-reloadable router ──

/// A hot-reloadable wrapper around [`Router`].
///
/// Uses `ArcSwap` for lock-free reads and atomic replacement; evaluations
/// running during an update finish against the tables they started with.
pub struct HotRouter {
    inner: ArcSwap<Router>,
}

impl HotRouter {
    pub fn new(router: Router) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(router)),
        }
    }

    pub fn route(&self, ctx: &mut ConnContext) -> RouteDecision {
        self.inner.load().route(ctx)
    }

    pub fn route_dns(&self, ctx: &mut ConnContext) -> DnsDecision {
        self.inner.load().route_dns(ctx)
    }

    pub fn route_dns_from(&self, start: usize, ctx: &mut ConnContext) -> DnsDecision {
        self.inner.load().route_dns_from(start, ctx)
    }

    pub fn check_dns_addresses(&self, index: usize, ctx: &mut ConnContext) -> bool {
        self.inner.load().check_dns_addresses(index, ctx)
    }

    /// Atomically replace the routing tables.
    pub fn update(&self, router: Router) {
        self.inner.store(Arc::new(router));
        vane_metrics::record_router_update();
    }

    /// Snapshot of the current tables.
    pub fn current(&self) -> Arc<Router> {
        self.inner.load_full()
    }
}

impl fmt::Debug for HotRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotRouter")
            .field("current", &self.inner.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(value: serde_json::Value) -> RuleConfig {
        serde_json::from_value(value).unwrap()
    }

    fn dns_rule(value: serde_json::Value) -> DnsRuleConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut builder = Router::builder();
        builder
            .rule(rule(json!({ "port": 443, "outbound": "tls-proxy" })))
            .rule(rule(json!({ "network": "tcp", "outbound": "tcp-proxy" })))
            .final_outbound("direct");
        let router = builder.build().unwrap();

        let mut ctx = ConnContext::new();
        ctx.network = Some(vane_core::Network::Tcp);
        ctx.destination_port = 443;
        let decision = router.route(&mut ctx);
        assert_eq!(decision.outbound, "tls-proxy");
        assert_eq!(decision.rule_index, Some(0));

        ctx.destination_port = 80;
        let decision = router.route(&mut ctx);
        assert_eq!(decision.outbound, "tcp-proxy");
        assert_eq!(decision.rule_index, Some(1));
    }

    #[test]
    fn unmatched_connection_falls_through_to_final() {
        let mut builder = Router::builder();
        builder
            .rule(rule(json!({ "port": 443, "outbound": "proxy" })))
            .final_outbound("direct");
        let router = builder.build().unwrap();

        let mut ctx = ConnContext::new();
        ctx.destination_port = 80;
        let decision = router.route(&mut ctx);
        assert_eq!(decision.outbound, "direct");
        assert_eq!(decision.rule_index, None);
    }

    #[test]
    fn defaults_apply_when_finals_are_unset() {
        let router = Router::builder().build().unwrap();
        assert_eq!(router.final_outbound(), "direct");
        assert_eq!(router.final_server(), "local");
    }

    #[test]
    fn rule_errors_carry_their_list_position() {
        let mut builder = Router::builder();
        builder
            .rule(rule(json!({ "port": 443, "outbound": "proxy" })))
            .rule(rule(json!({ "outbound": "proxy" })));
        let err = builder.build().unwrap_err();
        assert_eq!(err.to_string(), "rule[1]: missing conditions");
    }

    #[test]
    fn dns_rule_errors_carry_their_list_position() {
        let mut builder = Router::builder();
        builder.dns_rule(dns_rule(json!({ "server": "local" })));
        let err = builder.build().unwrap_err();
        assert_eq!(err.to_string(), "dns rule[0]: missing conditions");
    }

    #[test]
    fn bundle_errors_carry_their_tag() {
        let rule_set: RuleSetConfig = serde_json::from_value(json!({
            "tag": "broken",
            "rules": [{ "domain_regex": "([" }]
        }))
        .unwrap();
        let mut builder = Router::builder();
        builder.rule_set(rule_set);
        let err = builder.build().unwrap_err();
        assert!(
            err.to_string()
                .starts_with("rule-set broken: rule[0]: domain_regex: ")
        );
    }

    #[test]
    fn hot_router_serves_updates_atomically() {
        let mut builder = Router::builder();
        builder
            .rule(rule(json!({ "port": 443, "outbound": "proxy" })))
            .final_outbound("direct");
        let hot = HotRouter::new(builder.build().unwrap());

        let mut ctx = ConnContext::new();
        ctx.destination_port = 443;
        assert_eq!(hot.route(&mut ctx).outbound, "proxy");

        let mut replacement = Router::builder();
        replacement
            .rule(rule(json!({ "port": 443, "outbound": "other" })))
            .final_outbound("block");
        hot.update(replacement.build().unwrap());
        assert_eq!(hot.route(&mut ctx).outbound, "other");
        ctx.destination_port = 80;
        assert_eq!(hot.route(&mut ctx).outbound, "block");
    }

    #[test]
    fn routers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Router>();
        assert_send_sync::<HotRouter>();
    }
}
