//! Route rule compilation and evaluation.
//!
//! A rule is either a flat conjunction of condition groups (a default rule)
//! or a logical combinator over sub-rules. Compilation validates every
//! option up front and produces immutable items; evaluation walks them with
//! only the request context as mutable state.

use std::fmt;
use std::sync::Arc;

use ipnet::IpNet;
use vane_config::{Prefix, RuleConditions, RuleConfig};
use vane_core::{ConnContext, IpVersion};

use crate::error::RuleError;
use crate::item::{
    AuthUserItem, ClashModeItem, DomainItem, DomainKeywordItem, DomainRegexItem, GeoIpItem,
    GeositeItem, InboundItem, IpCidrItem, IpScope, IpVersionItem, NetworkItem, PackageNameItem,
    PortItem, PortRangeItem, ProcessNameItem, ProcessPathItem, ProcessPathRegexItem,
    ProtocolItem, QueryTypeItem, RuleItem, RuleSetItem, UserIdItem, UserItem, WifiBssidItem,
    WifiSsidItem,
};
use crate::source::{GeoIpSource, RouterServices};

/// The compiled condition groups of one default rule, partitioned by which
/// side of the request they inspect.
///
/// Every evaluated item must match (a conjunction); the partition exists so
/// the DNS layer can tell which conditions need a resolved destination
/// address and defer exactly those. `all_items` keeps the original option
/// order for display.
pub(crate) struct ConditionSet {
    items: Vec<Arc<dyn RuleItem>>,
    destination_address_items: Vec<Arc<dyn RuleItem>>,
    source_address_items: Vec<Arc<dyn RuleItem>>,
    destination_ip_items: Vec<Arc<dyn RuleItem>>,
    source_port_items: Vec<Arc<dyn RuleItem>>,
    destination_port_items: Vec<Arc<dyn RuleItem>>,
    all_items: Vec<Arc<dyn RuleItem>>,
    invert: bool,
}

impl ConditionSet {
    pub(crate) fn compile(
        conditions: &RuleConditions,
        invert: bool,
        services: &RouterServices,
        allow_rule_set: bool,
    ) -> Result<Self, RuleError> {
        let mut set = Self {
            items: Vec::new(),
            destination_address_items: Vec::new(),
            source_address_items: Vec::new(),
            destination_ip_items: Vec::new(),
            source_port_items: Vec::new(),
            destination_port_items: Vec::new(),
            all_items: Vec::new(),
            invert,
        };

        if !conditions.inbound.is_empty() {
            set.push_generic(Arc::new(InboundItem::new(&conditions.inbound)));
        }
        if let Some(value) = conditions.ip_version {
            let version =
                IpVersion::from_value(value).ok_or(RuleError::InvalidIpVersion(value))?;
            set.push_generic(Arc::new(IpVersionItem::new(version)));
        }
        if !conditions.query_type.is_empty() {
            set.push_generic(Arc::new(QueryTypeItem::new(&conditions.query_type)?));
        }
        if !conditions.network.is_empty() {
            set.push_generic(Arc::new(NetworkItem::new(&conditions.network)));
        }
        if !conditions.auth_user.is_empty() {
            set.push_generic(Arc::new(AuthUserItem::new(&conditions.auth_user)));
        }
        if !conditions.protocol.is_empty() {
            set.push_generic(Arc::new(ProtocolItem::new(&conditions.protocol)));
        }
        if !conditions.domain.is_empty() || !conditions.domain_suffix.is_empty() {
            set.push_destination_address(Arc::new(DomainItem::new(
                conditions.domain.to_vec(),
                conditions.domain_suffix.to_vec(),
            )));
        }
        if !conditions.domain_keyword.is_empty() {
            set.push_destination_address(Arc::new(DomainKeywordItem::new(
                &conditions.domain_keyword,
            )));
        }
        if !conditions.domain_regex.is_empty() {
            set.push_destination_address(Arc::new(DomainRegexItem::new(
                &conditions.domain_regex,
            )?));
        }
        if !conditions.geosite.is_empty() {
            let Some(source) = services.geosite.clone() else {
                return Err(RuleError::InvalidCondition {
                    field: "geosite",
                    message: "no geosite categories configured".to_string(),
                });
            };
            set.push_destination_address(Arc::new(GeositeItem::new(&conditions.geosite, source)));
        }
        if !conditions.source_geoip.is_empty() {
            let source = geoip_source(services, "source_geoip")?;
            set.push_source_address(Arc::new(GeoIpItem::new(
                &conditions.source_geoip,
                IpScope::Source,
                source,
            )));
        }
        if !conditions.geoip.is_empty() {
            let source = geoip_source(services, "geoip")?;
            set.push_destination_ip(Arc::new(GeoIpItem::new(
                &conditions.geoip,
                IpScope::Destination,
                source,
            )));
        }
        if !conditions.source_ip_cidr.is_empty() {
            let nets = parse_prefixes(&conditions.source_ip_cidr, "source_ip_cidr")?;
            set.push_source_address(Arc::new(IpCidrItem::new(nets, IpScope::Source)));
        }
        if !conditions.ip_cidr.is_empty() {
            let nets = parse_prefixes(&conditions.ip_cidr, "ip_cidr")?;
            set.push_destination_ip(Arc::new(IpCidrItem::new(nets, IpScope::Destination)));
        }
        if conditions.source_ip_is_private {
            set.push_source_address(Arc::new(IpCidrItem::private(IpScope::Source)));
        }
        if conditions.ip_is_private {
            set.push_destination_ip(Arc::new(IpCidrItem::private(IpScope::Destination)));
        }
        if !conditions.source_port.is_empty() {
            set.push_source_port(Arc::new(PortItem::new(&conditions.source_port, true)));
        }
        if !conditions.source_port_range.is_empty() {
            set.push_source_port(Arc::new(PortRangeItem::new(
                &conditions.source_port_range,
                true,
            )?));
        }
        if !conditions.port.is_empty() {
            set.push_destination_port(Arc::new(PortItem::new(&conditions.port, false)));
        }
        if !conditions.port_range.is_empty() {
            set.push_destination_port(Arc::new(PortRangeItem::new(
                &conditions.port_range,
                false,
            )?));
        }
        if !conditions.process_name.is_empty() {
            set.push_generic(Arc::new(ProcessNameItem::new(&conditions.process_name)));
        }
        if !conditions.process_path.is_empty() {
            set.push_generic(Arc::new(ProcessPathItem::new(&conditions.process_path)));
        }
        if !conditions.process_path_regex.is_empty() {
            set.push_generic(Arc::new(ProcessPathRegexItem::new(
                &conditions.process_path_regex,
            )?));
        }
        if !conditions.package_name.is_empty() {
            set.push_generic(Arc::new(PackageNameItem::new(&conditions.package_name)));
        }
        if !conditions.user.is_empty() {
            set.push_generic(Arc::new(UserItem::new(&conditions.user)));
        }
        if !conditions.user_id.is_empty() {
            set.push_generic(Arc::new(UserIdItem::new(&conditions.user_id)));
        }
        if let Some(mode) = conditions.clash_mode.as_deref() {
            set.push_generic(Arc::new(ClashModeItem::new(mode)));
        }
        if !conditions.wifi_ssid.is_empty() {
            set.push_generic(Arc::new(WifiSsidItem::new(&conditions.wifi_ssid)));
        }
        if !conditions.wifi_bssid.is_empty() {
            set.push_generic(Arc::new(WifiBssidItem::new(&conditions.wifi_bssid)));
        }
        if !conditions.rule_set.is_empty() {
            if !allow_rule_set {
                return Err(RuleError::InvalidCondition {
                    field: "rule_set",
                    message: "nested rule-set references are not allowed".to_string(),
                });
            }
            for tag in &conditions.rule_set {
                if !services.rule_sets.contains(tag) {
                    return Err(RuleError::UnknownRuleSet(tag.clone()));
                }
            }
            set.push_generic(Arc::new(RuleSetItem::new(
                &conditions.rule_set,
                services.rule_sets.clone(),
                conditions.rule_set_ip_cidr_match_source,
                conditions.rule_set_ip_cidr_accept_empty,
            )));
        }

        Ok(set)
    }

    fn push_item(
        bucket: &mut Vec<Arc<dyn RuleItem>>,
        all: &mut Vec<Arc<dyn RuleItem>>,
        item: Arc<dyn RuleItem>,
    ) {
        bucket.push(item.clone());
        all.push(item);
    }

    pub(crate) fn push_generic(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.items, &mut self.all_items, item);
    }

    fn push_destination_address(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.destination_address_items, &mut self.all_items, item);
    }

    fn push_source_address(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.source_address_items, &mut self.all_items, item);
    }

    fn push_destination_ip(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.destination_ip_items, &mut self.all_items, item);
    }

    fn push_source_port(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.source_port_items, &mut self.all_items, item);
    }

    fn push_destination_port(&mut self, item: Arc<dyn RuleItem>) {
        Self::push_item(&mut self.destination_port_items, &mut self.all_items, item);
    }

    /// Conjunction over every condition group, then the invert flag.
    ///
    /// While the context carries the ignore flag, destination-IP groups are
    /// skipped entirely, as if the rule had never declared them.
    pub(crate) fn matches(&self, ctx: &mut ConnContext) -> bool {
        self.matches_conjunction(ctx) != self.invert
    }

    fn matches_conjunction(&self, ctx: &mut ConnContext) -> bool {
        for item in &self.items {
            if !item.matches(ctx) {
                return false;
            }
        }
        for item in &self.source_address_items {
            if !item.matches(ctx) {
                return false;
            }
        }
        for item in &self.source_port_items {
            if !item.matches(ctx) {
                return false;
            }
        }
        for item in &self.destination_address_items {
            if !item.matches(ctx) {
                return false;
            }
        }
        for item in &self.destination_port_items {
            if !item.matches(ctx) {
                return false;
            }
        }
        if !ctx.ignores_destination_ip_cidr() {
            for item in &self.destination_ip_items {
                if !item.matches(ctx) {
                    return false;
                }
            }
        }
        true
    }

    pub(crate) fn contains_destination_ip_rules(&self) -> bool {
        !self.destination_ip_items.is_empty()
            || self
                .all_items
                .iter()
                .any(|item| item.contains_destination_ip_rules())
    }
}

impl fmt::Display for ConditionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.invert {
            f.write_str("!(")?;
        }
        for (i, item) in self.all_items.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{item}")?;
        }
        if self.invert {
            f.write_str(")")?;
        }
        Ok(())
    }
}

fn geoip_source(
    services: &RouterServices,
    field: &'static str,
) -> Result<Arc<dyn GeoIpSource>, RuleError> {
    services
        .geoip
        .clone()
        .ok_or_else(|| RuleError::InvalidCondition {
            field,
            message: "no geoip database configured".to_string(),
        })
}

pub(crate) fn parse_prefixes(
    values: &[String],
    field: &'static str,
) -> Result<Vec<IpNet>, RuleError> {
    let mut nets = Vec::with_capacity(values.len());
    for value in values {
        let prefix: Prefix = value.parse().map_err(|err| RuleError::InvalidCondition {
            field,
            message: format!("{value}: {err}"),
        })?;
        nets.push(prefix.0);
    }
    Ok(nets)
}

/// How a logical rule combines its sub-rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalMode {
    And,
    Or,
}

impl std::str::FromStr for LogicalMode {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(LogicalMode::And),
            "or" => Ok(LogicalMode::Or),
            other => Err(RuleError::UnknownLogicalMode(other.to_string())),
        }
    }
}

/// A flat conjunction of condition groups with an outbound action.
pub struct DefaultRule {
    set: ConditionSet,
    outbound: Option<String>,
}

impl DefaultRule {
    fn new(
        config: &RuleConfig,
        services: &RouterServices,
        check_outbound: bool,
        allow_rule_set: bool,
    ) -> Result<Self, RuleError> {
        if config.conditions.is_empty() {
            return Err(RuleError::MissingConditions);
        }
        if check_outbound && config.outbound.is_none() {
            return Err(RuleError::MissingField("outbound"));
        }
        let set = ConditionSet::compile(&config.conditions, config.invert, services, allow_rule_set)?;
        Ok(Self {
            set,
            outbound: config.outbound.clone(),
        })
    }

    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        self.set.matches(ctx)
    }
}

impl fmt::Display for DefaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.set.fmt(f)
    }
}

impl fmt::Debug for DefaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRule")
            .field("conditions", &format_args!("{}", self.set))
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// AND/OR combinator over sub-rules, with its own invert flag.
pub struct LogicalRule {
    mode: LogicalMode,
    invert: bool,
    rules: Vec<Rule>,
    outbound: Option<String>,
}

impl LogicalRule {
    fn new(
        config: &RuleConfig,
        services: &RouterServices,
        check_outbound: bool,
        allow_rule_set: bool,
    ) -> Result<Self, RuleError> {
        if config.rules.is_empty() {
            return Err(RuleError::MissingConditions);
        }
        if check_outbound && config.outbound.is_none() {
            return Err(RuleError::MissingField("outbound"));
        }
        let mode: LogicalMode = config.mode.as_deref().unwrap_or("").parse()?;
        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, sub) in config.rules.iter().enumerate() {
            let rule = Rule::new(sub, services, false, allow_rule_set)
                .map_err(|err| err.in_sub_rule(index))?;
            rules.push(rule);
        }
        Ok(Self {
            mode,
            invert: config.invert,
            rules,
            outbound: config.outbound.clone(),
        })
    }

    /// Short-circuiting AND/OR. The per-rule cache is reset before every
    /// sub-rule that is actually attempted; sub-rules skipped by the
    /// short-circuit see no reset.
    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        let result = match self.mode {
            LogicalMode::And => {
                let mut all = true;
                for rule in &self.rules {
                    ctx.reset_rule_cache();
                    if !rule.matches(ctx) {
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
                    if rule.matches(ctx) {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        result != self.invert
    }
}

impl fmt::Display for LogicalRule {
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

impl fmt::Debug for LogicalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalRule")
            .field("mode", &self.mode)
            .field("invert", &self.invert)
            .field("rules", &self.rules)
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// A compiled route rule.
#[derive(Debug)]
pub enum Rule {
    Default(DefaultRule),
    Logical(LogicalRule),
}

impl Rule {
    /// Build a rule from its configuration.
    ///
    /// `check_outbound` is set for top-level route rules, which must name an
    /// outbound; sub-rules and rule-set members carry no action of their
    /// own. `allow_rule_set` is cleared inside rule-set bundles, which may
    /// not reference other bundles.
    pub fn new(
        config: &RuleConfig,
        services: &RouterServices,
        check_outbound: bool,
        allow_rule_set: bool,
    ) -> Result<Self, RuleError> {
        match config.kind.as_str() {
            "" | "default" => DefaultRule::new(config, services, check_outbound, allow_rule_set)
                .map(Rule::Default),
            "logical" => LogicalRule::new(config, services, check_outbound, allow_rule_set)
                .map(Rule::Logical),
            other => Err(RuleError::UnknownRuleType(other.to_string())),
        }
    }

    pub fn matches(&self, ctx: &mut ConnContext) -> bool {
        match self {
            Rule::Default(rule) => rule.matches(ctx),
            Rule::Logical(rule) => rule.matches(ctx),
        }
    }

    /// The outbound tag this rule routes to, when it names one.
    pub fn outbound(&self) -> Option<&str> {
        match self {
            Rule::Default(rule) => rule.outbound.as_deref(),
            Rule::Logical(rule) => rule.outbound.as_deref(),
        }
    }

    /// Whether any condition of this rule, including conditions reached
    /// through rule-set references, tests the resolved destination address.
    pub fn contains_destination_ip_rules(&self) -> bool {
        match self {
            Rule::Default(rule) => rule.set.contains_destination_ip_rules(),
            Rule::Logical(rule) => rule
                .rules
                .iter()
                .any(Rule::contains_destination_ip_rules),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Default(rule) => rule.fmt(f),
            Rule::Logical(rule) => rule.fmt(f),
        }
    }
}
