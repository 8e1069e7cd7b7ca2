//! Rule-set reference condition.

use std::fmt;
use std::sync::Arc;

use vane_core::{ConnContext, RuleSetFlagsGuard};

use crate::item::{RuleItem, write_values};
use crate::rule_set::RuleSetRegistry;

/// The `rule_set` condition group: true when any referenced bundle matches
/// the request.
///
/// The two IP sub-options are installed on the context for the duration of
/// the bundle evaluation and restored afterwards, so they never leak into
/// sibling conditions of the referencing rule.
pub struct RuleSetItem {
    tags: Vec<String>,
    registry: Arc<RuleSetRegistry>,
    match_source: bool,
    accept_empty: bool,
}

impl RuleSetItem {
    pub fn new(
        tags: &[String],
        registry: Arc<RuleSetRegistry>,
        match_source: bool,
        accept_empty: bool,
    ) -> Self {
        Self {
            tags: tags.to_vec(),
            registry,
            match_source,
            accept_empty,
        }
    }
}

impl RuleItem for RuleSetItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let mut guard = RuleSetFlagsGuard::new(ctx, self.match_source, self.accept_empty);
        for tag in &self.tags {
            if let Some(set) = self.registry.get(tag)
                && set.matches(&mut guard)
            {
                return true;
            }
        }
        false
    }

    fn contains_destination_ip_rules(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| self.registry.contains_destination_ip_rules(tag))
    }
}

impl fmt::Display for RuleSetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "rule_set", &self.tags)
    }
}
