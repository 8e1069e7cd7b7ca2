//! Named rule-set bundles and the registry that serves them to rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use vane_config::RuleConfig;
use vane_core::ConnContext;

use crate::error::RuleError;
use crate::rule::Rule;
use crate::source::RouterServices;

/// A compiled bundle of condition-only rules, matched as a disjunction:
/// the bundle matches when any member rule does.
#[derive(Debug)]
pub struct RuleSet {
    tag: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile a bundle. Member rules carry no outbound of their own and
    /// may not reference other bundles.
    pub fn compile(
        tag: &str,
        rules: &[RuleConfig],
        services: &RouterServices,
    ) -> Result<Self, RuleError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, config) in rules.iter().enumerate() {
            let rule =
                Rule::new(config, services, false, false).map_err(|err| err.in_rule(index))?;
            compiled.push(rule);
        }
        Ok(Self {
            tag: tag.to_string(),
            rules: compiled,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        self.rules.iter().any(|rule| rule.matches(ctx))
    }

    pub fn contains_destination_ip_rules(&self) -> bool {
        self.rules.iter().any(Rule::contains_destination_ip_rules)
    }
}

/// Shared collection of compiled bundles.
///
/// Reads are lock-free snapshots; an update builds a new map and swaps it
/// in, so evaluations running during an update keep the bundles they
/// started with.
pub struct RuleSetRegistry {
    sets: ArcSwap<HashMap<String, Arc<RuleSet>>>,
}

impl RuleSetRegistry {
    pub fn new() -> Self {
        Self {
            sets: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Register a bundle, replacing any previous one with the same tag.
    pub fn insert(&self, set: RuleSet) {
        let set = Arc::new(set);
        let current = self.sets.load_full();
        let mut next = (*current).clone();
        next.insert(set.tag().to_string(), set);
        vane_metrics::set_rule_sets_active(next.len());
        self.sets.store(Arc::new(next));
    }

    /// Swap the whole collection in one step.
    pub fn replace_all(&self, sets: Vec<RuleSet>) {
        let mut next = HashMap::with_capacity(sets.len());
        for set in sets {
            next.insert(set.tag().to_string(), Arc::new(set));
        }
        vane_metrics::set_rule_sets_active(next.len());
        self.sets.store(Arc::new(next));
    }

    pub fn get(&self, tag: &str) -> Option<Arc<RuleSet>> {
        self.sets.load().get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.sets.load().contains_key(tag)
    }

    /// Whether the named bundle tests resolved destination addresses.
    /// Unregistered tags report false.
    pub fn contains_destination_ip_rules(&self, tag: &str) -> bool {
        self.sets
            .load()
            .get(tag)
            .is_some_and(|set| set.contains_destination_ip_rules())
    }

    pub fn len(&self) -> usize {
        self.sets.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.load().is_empty()
    }
}

impl Default for RuleSetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuleSetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = self.sets.load();
        let mut tags: Vec<&String> = sets.keys().collect();
        tags.sort();
        f.debug_struct("RuleSetRegistry")
            .field("tags", &tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule_configs(value: serde_json::Value) -> Vec<RuleConfig> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn bundle_matches_any_member() {
        let services = RouterServices::default();
        let set = RuleSet::compile(
            "sample",
            &rule_configs(json!([
                { "domain_suffix": "example.com" },
                { "port": 853 }
            ])),
            &services,
        )
        .unwrap();

        let mut ctx = ConnContext::new();
        ctx.destination_port = 853;
        assert!(set.matches(&mut ctx));
        ctx.destination_port = 80;
        assert!(!set.matches(&mut ctx));
        ctx.domain = Some("www.example.com".to_string());
        assert!(set.matches(&mut ctx));
    }

    #[test]
    fn member_errors_carry_their_position() {
        let services = RouterServices::default();
        let err = RuleSet::compile(
            "sample",
            &rule_configs(json!([{ "port": 80 }, {}])),
            &services,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "rule[1]: missing conditions");
    }

    #[test]
    fn members_cannot_reference_other_bundles() {
        let services = RouterServices::default();
        let err = RuleSet::compile(
            "outer",
            &rule_configs(json!([{ "rule_set": "inner" }])),
            &services,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "rule[0]: rule_set: nested rule-set references are not allowed"
        );
    }

    #[test]
    fn registry_lookup_and_replace() {
        let services = RouterServices::default();
        let registry = &services.rule_sets;
        assert!(registry.is_empty());
        assert!(registry.get("sample").is_none());

        let set = RuleSet::compile(
            "sample",
            &rule_configs(json!([{ "port": 443 }])),
            &services,
        )
        .unwrap();
        registry.insert(set);
        assert!(registry.contains("sample"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("sample").unwrap().len(), 1);

        registry.replace_all(Vec::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn destination_ip_shape_is_visible_through_the_registry() {
        let services = RouterServices::default();
        let with_ip = RuleSet::compile(
            "with-ip",
            &rule_configs(json!([{ "ip_cidr": "10.0.0.0/8" }])),
            &services,
        )
        .unwrap();
        let without_ip = RuleSet::compile(
            "without-ip",
            &rule_configs(json!([{ "source_ip_cidr": "10.0.0.0/8" }])),
            &services,
        )
        .unwrap();
        services.rule_sets.insert(with_ip);
        services.rule_sets.insert(without_ip);

        assert!(services.rule_sets.contains_destination_ip_rules("with-ip"));
        assert!(!services.rule_sets.contains_destination_ip_rules("without-ip"));
        assert!(!services.rule_sets.contains_destination_ip_rules("missing"));
    }

    #[test]
    fn referencing_rule_consults_the_registry() {
        let services = RouterServices::default();
        let set = RuleSet::compile(
            "site",
            &rule_configs(json!([{ "domain_suffix": "example.com" }])),
            &services,
        )
        .unwrap();
        services.rule_sets.insert(set);

        let config: RuleConfig =
            serde_json::from_value(json!({ "rule_set": "site", "outbound": "proxy" })).unwrap();
        let rule = Rule::new(&config, &services, true, true).unwrap();

        let mut ctx = ConnContext::new();
        ctx.domain = Some("cdn.example.com".to_string());
        assert!(rule.matches(&mut ctx));
        ctx.domain = Some("example.org".to_string());
        assert!(!rule.matches(&mut ctx));
        // shape is propagated through the reference
        assert!(!rule.contains_destination_ip_rules());
    }

    #[test]
    fn ip_cidr_flags_are_scoped_to_the_bundle_evaluation() {
        let services = RouterServices::default();
        let set = RuleSet::compile(
            "nets",
            &rule_configs(json!([{ "ip_cidr": "10.0.0.0/8" }])),
            &services,
        )
        .unwrap();
        services.rule_sets.insert(set);

        let config: RuleConfig = serde_json::from_value(json!({
            "rule_set": "nets",
            "rule_set_ip_cidr_match_source": true,
            "outbound": "proxy"
        }))
        .unwrap();
        let rule = Rule::new(&config, &services, true, true).unwrap();

        let mut ctx = ConnContext::new();
        ctx.source_ip = Some("10.9.9.9".parse().unwrap());
        ctx.destination_ip = Some("8.8.8.8".parse().unwrap());
        assert!(rule.matches(&mut ctx));
        assert!(!ctx.rule_set_matches_source_ip());

        ctx.source_ip = Some("8.8.4.4".parse().unwrap());
        assert!(!rule.matches(&mut ctx));
        assert!(!ctx.rule_set_matches_source_ip());
    }
}
