//! Error types for rule construction.

use thiserror::Error;

/// Errors raised while building rules, rule-sets and routers.
///
/// Construction is fail-fast: the first malformed condition aborts the rule
/// with the offending field named. Evaluation itself never fails; an
/// unsatisfiable condition simply does not match.
#[derive(Error, Debug)]
pub enum RuleError {
    /// A rule with no condition groups, or a logical rule with no sub-rules.
    #[error("missing conditions")]
    MissingConditions,

    /// A required action tag was absent ("outbound" or "server").
    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("unknown logical mode: {0}")]
    UnknownLogicalMode(String),

    #[error("invalid ip version: {0}")]
    InvalidIpVersion(u8),

    /// A condition group whose options failed to parse or that cannot be
    /// satisfied by the configured collaborators.
    #[error("{field}: {message}")]
    InvalidCondition {
        field: &'static str,
        message: String,
    },

    /// Construction failure inside a logical rule's sub-rule list.
    #[error("sub rule[{index}]: {source}")]
    SubRule {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },

    /// Construction failure for the i-th rule of a rule list.
    #[error("rule[{index}]: {source}")]
    Rule {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },

    /// Construction failure for the i-th DNS rule of a rule list.
    #[error("dns rule[{index}]: {source}")]
    DnsRule {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },

    /// Construction failure inside a named rule-set bundle.
    #[error("rule-set {tag}: {source}")]
    InRuleSet {
        tag: String,
        #[source]
        source: Box<RuleError>,
    },

    /// A `rule_set` condition referencing a tag absent from the registry.
    #[error("unknown rule-set: {0}")]
    UnknownRuleSet(String),

    #[error("geoip error: {0}")]
    GeoIp(String),
}

impl RuleError {
    /// Wrap an error with a sub-rule position.
    pub(crate) fn in_sub_rule(self, index: usize) -> Self {
        RuleError::SubRule {
            index,
            source: Box::new(self),
        }
    }

    /// Wrap an error with a rule-list position.
    pub(crate) fn in_rule(self, index: usize) -> Self {
        RuleError::Rule {
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_carry_positions() {
        let err = RuleError::MissingConditions.in_sub_rule(2).in_rule(0);
        assert_eq!(err.to_string(), "rule[0]: sub rule[2]: missing conditions");
    }

    #[test]
    fn field_errors_name_the_field() {
        let err = RuleError::InvalidCondition {
            field: "domain_regex",
            message: "unclosed group".into(),
        };
        assert_eq!(err.to_string(), "domain_regex: unclosed group");
        assert_eq!(
            RuleError::MissingField("outbound").to_string(),
            "missing outbound field"
        );
        assert_eq!(
            RuleError::MissingField("server").to_string(),
            "missing server field"
        );
    }
}
