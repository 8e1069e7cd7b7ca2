//! Plain tag-membership conditions.

use std::fmt;

use vane_core::ConnContext;

use crate::item::{RuleItem, write_values};

/// The `inbound` condition group.
pub struct InboundItem {
    tags: Vec<String>,
}

impl InboundItem {
    pub fn new(tags: &[String]) -> Self {
        Self {
            tags: tags.to_vec(),
        }
    }
}

impl RuleItem for InboundItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.inbound
            .as_deref()
            .is_some_and(|inbound| self.tags.iter().any(|t| t == inbound))
    }
}

impl fmt::Display for InboundItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "inbound", &self.tags)
    }
}

/// The `outbound` condition group of DNS rules. The reserved tag `any`
/// matches every request that carries an outbound at all.
pub struct OutboundItem {
    tags: Vec<String>,
    match_any: bool,
}

impl OutboundItem {
    pub fn new(tags: &[String]) -> Self {
        let match_any = tags.iter().any(|t| t == "any");
        Self {
            tags: tags.to_vec(),
            match_any,
        }
    }
}

impl RuleItem for OutboundItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let Some(outbound) = ctx.outbound.as_deref() else {
            return false;
        };
        if self.match_any {
            return true;
        }
        self.tags.iter().any(|t| t == outbound)
    }
}

impl fmt::Display for OutboundItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "outbound", &self.tags)
    }
}

/// The `clash_mode` condition, compared case-insensitively.
pub struct ClashModeItem {
    mode: String,
}

impl ClashModeItem {
    pub fn new(mode: &str) -> Self {
        Self {
            mode: mode.to_string(),
        }
    }
}

impl RuleItem for ClashModeItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case(&self.mode))
    }
}

impl fmt::Display for ClashModeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clash_mode={}", self.mode)
    }
}

/// The `auth_user` condition group.
pub struct AuthUserItem {
    users: Vec<String>,
}

impl AuthUserItem {
    pub fn new(users: &[String]) -> Self {
        Self {
            users: users.to_vec(),
        }
    }
}

impl RuleItem for AuthUserItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.auth_user
            .as_deref()
            .is_some_and(|user| self.users.iter().any(|u| u == user))
    }
}

impl fmt::Display for AuthUserItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "auth_user", &self.users)
    }
}

/// The `protocol` condition group, matched against the sniffed protocol.
pub struct ProtocolItem {
    protocols: Vec<String>,
}

impl ProtocolItem {
    pub fn new(protocols: &[String]) -> Self {
        Self {
            protocols: protocols.to_vec(),
        }
    }
}

impl RuleItem for ProtocolItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.protocol
            .as_deref()
            .is_some_and(|protocol| self.protocols.iter().any(|p| p == protocol))
    }
}

impl fmt::Display for ProtocolItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "protocol", &self.protocols)
    }
}
