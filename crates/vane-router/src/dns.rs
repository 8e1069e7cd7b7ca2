//! DNS rule compilation and evaluation.
//!
//! DNS rules select a resolver before any address for the query exists, so
//! they evaluate in two phases: [`DnsRule::matches`] ignores destination-IP
//! conditions outright, and [`DnsRule::matches_with_destination`] re-checks
//! the full conjunction once the candidate server has produced addresses.

use std::fmt;
use std::sync::Arc;

use ipnet::IpNet;
use vane_config::DnsRuleConfig;
use vane_core::{ConnContext, IgnoreDestinationGuard};

use crate::error::RuleError;
use crate::item::OutboundItem;
use crate::rule::{ConditionSet, LogicalMode};
use crate::source::RouterServices;

/// A flat conjunction of condition groups selecting a DNS server.
pub struct DefaultDnsRule {
    set: ConditionSet,
    server: Option<String>,
    disable_cache: bool,
    rewrite_ttl: Option<u32>,
    client_subnet: Option<IpNet>,
}

impl DefaultDnsRule {
    fn new(
        config: &DnsRuleConfig,
        services: &RouterServices,
        check_server: bool,
    ) -> Result<Self, RuleError> {
        if config.conditions.is_empty() && config.outbound.is_empty() {
            return Err(RuleError::MissingConditions);
        }
        if check_server && config.server.is_none() {
            return Err(RuleError::MissingField("server"));
        }
        let mut set = ConditionSet::compile(&config.conditions, config.invert, services, true)?;
        if !config.outbound.is_empty() {
            set.push_generic(Arc::new(OutboundItem::new(&config.outbound)));
        }
        Ok(Self {
            set,
            server: config.server.clone(),
            disable_cache: config.disable_cache,
            rewrite_ttl: config.rewrite_ttl,
            client_subnet: config.client_subnet.map(|prefix| prefix.0),
        })
    }

    /// Pre-resolution phase: destination-IP conditions are skipped as if
    /// the rule never declared them. The skip flag is scoped to this call
    /// and restored even when another condition rejects first.
    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        let mut guard = IgnoreDestinationGuard::new(ctx);
        self.set.matches(&mut guard)
    }

    /// Post-resolution phase: the full conjunction, destination-IP
    /// conditions included.
    pub fn matches_with_destination(&self, ctx: &mut ConnContext) -> bool {
        self.set.matches(ctx)
    }
}

impl fmt::Display for DefaultDnsRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.set.fmt(f)
    }
}

impl fmt::Debug for DefaultDnsRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDnsRule")
            .field("conditions", &format_args!("{}", self.set))
            .field("server", &self.server)
            .finish()
    }
}

/// AND/OR combinator over DNS sub-rules.
pub struct LogicalDnsRule {
    mode: LogicalMode,
    invert: bool,
    rules: Vec<DnsRule>,
    server: Option<String>,
    disable_cache: bool,
    rewrite_ttl: Option<u32>,
    client_subnet: Option<IpNet>,
}

impl LogicalDnsRule {
    fn new(
        config: &DnsRuleConfig,
        services: &RouterServices,
        check_server: bool,
    ) -> Result<Self, RuleError> {
        if config.rules.is_empty() {
            return Err(RuleError::MissingConditions);
        }
        if check_server && config.server.is_none() {
            return Err(RuleError::MissingField("server"));
        }
        let mode: LogicalMode = config.mode.as_deref().unwrap_or("").parse()?;
        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, sub) in config.rules.iter().enumerate() {
            let rule =
                DnsRule::new(sub, services, false).map_err(|err| err.in_sub_rule(index))?;
            rules.push(rule);
        }
        Ok(Self {
            mode,
            invert: config.invert,
            rules,
            server: config.server.clone(),
            disable_cache: config.disable_cache,
            rewrite_ttl: config.rewrite_ttl,
            client_subnet: config.client_subnet.map(|prefix| prefix.0),
        })
    }

    fn combine(&self, ctx: &mut ConnContext, with_destination: bool) -> bool {
        let result = match self.mode {
            LogicalMode::And => {
                let mut all = true;
                for rule in &self.rules {
                    ctx.reset_rule_cache();
                    let matched = if with_destination {
                        rule.matches_with_destination(ctx)
                    } else {
                        rule.matches(ctx)
                    };
                    if !matched {
                        all = false;
                        break;
                    }
                }
                all
            }
            LogicalMode::Or => {
                let mut any = false;
                for rule in &self.rules {
                    ctx.reset_rule_cache();
                    let matched = if with_destination {
                        rule.matches_with_destination(ctx)
                    } else {
                        rule.matches(ctx)
                    };
                    if matched {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        result != self.invert
    }

    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        let mut guard = IgnoreDestinationGuard::new(ctx);
        self.combine(&mut guard, false)
    }

    pub fn matches_with_destination(&self, ctx: &mut ConnContext) -> bool {
        self.combine(ctx, true)
    }
}

impl fmt::Display for LogicalDnsRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.invert {
            f.write_str("!(")?;
        }
        let separator = match self.mode {
            LogicalMode::And => " && ",
            LogicalMode::Or => " || ",
        };
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(separator)?;
            }
            write!(f, "({rule})")?;
        }
        if self.invert {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogicalDnsRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDnsRule")
            .field("mode", &self.mode)
            .field("invert", &self.invert)
            .field("rules", &self.rules)
            .field("server", &self.server)
            .finish()
    }
}

/// A compiled DNS rule.
#[derive(Debug)]
pub enum DnsRule {
    Default(DefaultDnsRule),
    Logical(LogicalDnsRule),
}

impl DnsRule {
    /// Build a DNS rule from its configuration. `check_server` is set for
    /// top-level rules, which must name a server; sub-rules carry none.
    pub fn new(
        config: &DnsRuleConfig,
        services: &RouterServices,
        check_server: bool,
    ) -> Result<Self, RuleError> {
        match config.kind.as_str() {
            "" | "default" => {
                DefaultDnsRule::new(config, services, check_server).map(DnsRule::Default)
            }
            "logical" => {
                LogicalDnsRule::new(config, services, check_server).map(DnsRule::Logical)
            }
            other => Err(RuleError::UnknownRuleType(other.to_string())),
        }
    }

    /// Pre-resolution match, destination-IP conditions deferred.
    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        match self {
            DnsRule::Default(rule) => rule.matches(ctx),
            DnsRule::Logical(rule) => rule.matches(ctx),
        }
    }

    /// Post-resolution match over the full conjunction.
    pub fn matches_with_destination(&self, ctx: &mut ConnContext) -> bool {
        match self {
            DnsRule::Default(rule) => rule.matches_with_destination(ctx),
            DnsRule::Logical(rule) => rule.matches_with_destination(ctx),
        }
    }

    pub fn server(&self) -> Option<&str> {
        match self {
            DnsRule::Default(rule) => rule.server.as_deref(),
            DnsRule::Logical(rule) => rule.server.as_deref(),
        }
    }

    pub fn disable_cache(&self) -> bool {
        match self {
            DnsRule::Default(rule) => rule.disable_cache,
            DnsRule::Logical(rule) => rule.disable_cache,
        }
    }

    pub fn rewrite_ttl(&self) -> Option<u32> {
        match self {
            DnsRule::Default(rule) => rule.rewrite_ttl,
            DnsRule::Logical(rule) => rule.rewrite_ttl,
        }
    }

    pub fn client_subnet(&self) -> Option<IpNet> {
        match self {
            DnsRule::Default(rule) => rule.client_subnet,
            DnsRule::Logical(rule) => rule.client_subnet,
        }
    }

    /// Whether this rule has deferred destination-IP conditions that need
    /// the post-resolution phase at all.
    pub fn contains_destination_ip_rules(&self) -> bool {
        match self {
            DnsRule::Default(rule) => rule.set.contains_destination_ip_rules(),
            DnsRule::Logical(rule) => rule
                .rules
                .iter()
                .any(DnsRule::contains_destination_ip_rules),
        }
    }
}

impl fmt::Display for DnsRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRule::Default(rule) => rule.fmt(f),
            DnsRule::Logical(rule) => rule.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn build(value: serde_json::Value) -> Result<DnsRule, RuleError> {
        let config: DnsRuleConfig = serde_json::from_value(value).unwrap();
        DnsRule::new(&config, &RouterServices::default(), true)
    }

    #[test]
    fn outbound_alone_is_a_valid_condition() {
        let rule = build(json!({ "outbound": "any", "server": "remote" })).unwrap();
        let mut ctx = ConnContext::new();
        assert!(!rule.matches(&mut ctx));
        ctx.outbound = Some("proxy".to_string());
        assert!(rule.matches(&mut ctx));
        assert_eq!(rule.server(), Some("remote"));
    }

    #[test]
    fn metadata_alone_is_not_a_condition() {
        let err = build(json!({ "disable_cache": true, "server": "remote" })).unwrap_err();
        assert_eq!(err.to_string(), "missing conditions");
    }

    #[test]
    fn top_level_rule_requires_a_server() {
        let err = build(json!({ "query_type": "A" })).unwrap_err();
        assert_eq!(err.to_string(), "missing server field");
    }

    #[test]
    fn destination_conditions_are_deferred_before_resolution() {
        let rule = build(json!({ "ip_cidr": "10.0.0.0/8", "server": "local" })).unwrap();
        let mut ctx = ConnContext::new();
        // no address known yet: the condition is treated as absent
        assert!(rule.matches(&mut ctx));
        assert!(rule.contains_destination_ip_rules());

        ctx.destination_addresses = vec!["10.1.2.3".parse().unwrap()];
        assert!(rule.matches_with_destination(&mut ctx));
        ctx.destination_addresses = vec!["8.8.8.8".parse().unwrap()];
        assert!(!rule.matches_with_destination(&mut ctx));
    }

    #[test]
    fn skip_flag_is_restored_after_a_reject() {
        let rule = build(json!({
            "ip_cidr": "10.0.0.0/8",
            "port": 53,
            "server": "local"
        }))
        .unwrap();
        let mut ctx = ConnContext::new();
        ctx.destination_port = 80;
        assert!(!rule.matches(&mut ctx));
        assert!(!ctx.ignores_destination_ip_cidr());
    }

    #[test]
    fn invert_applies_after_the_deferral() {
        let rule = build(json!({
            "ip_cidr": "10.0.0.0/8",
            "invert": true,
            "server": "local"
        }))
        .unwrap();
        let mut ctx = ConnContext::new();
        // the deferred conjunction is vacuously true, so inversion rejects
        assert!(!rule.matches(&mut ctx));
    }

    #[test]
    fn source_conditions_do_not_defer() {
        let rule = build(json!({ "source_ip_cidr": "10.0.0.0/8", "server": "local" })).unwrap();
        assert!(!rule.contains_destination_ip_rules());
        let mut ctx = ConnContext::new();
        assert!(!rule.matches(&mut ctx));
        ctx.source_ip = Some("10.0.0.4".parse().unwrap());
        assert!(rule.matches(&mut ctx));
    }

    #[test]
    fn logical_dns_rules_combine_sub_rules() {
        let rule = build(json!({
            "type": "logical",
            "mode": "or",
            "rules": [
                { "query_type": "A" },
                { "outbound": "any" }
            ],
            "server": "remote"
        }))
        .unwrap();
        let mut ctx = ConnContext::new();
        assert!(!rule.matches(&mut ctx));
        ctx.query_type = Some(vane_core::RecordType::A);
        assert!(rule.matches(&mut ctx));
    }

    #[test]
    fn response_metadata_is_exposed() {
        let rule = build(json!({
            "query_type": "A",
            "server": "remote",
            "disable_cache": true,
            "rewrite_ttl": 60,
            "client_subnet": "203.0.113.0/24"
        }))
        .unwrap();
        assert!(rule.disable_cache());
        assert_eq!(rule.rewrite_ttl(), Some(60));
        assert_eq!(
            rule.client_subnet(),
            Some("203.0.113.0/24".parse().unwrap())
        );
    }

    #[test]
    fn display_includes_outbound_condition() {
        let rule = build(json!({
            "query_type": "A",
            "outbound": "any",
            "server": "remote"
        }))
        .unwrap();
        assert_eq!(rule.to_string(), "query_type=A outbound=any");
    }
}
