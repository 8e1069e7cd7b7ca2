//! Leaf match conditions.
//!
//! Every condition kind a rule recognizes lives here as one [`RuleItem`]
//! implementation. Items are built once from validated options and then
//! evaluated concurrently; the per-request context is the only mutable
//! state they touch (for its memoized lookups and scoped matching flags).

mod domain;
mod ip;
mod network;
mod port;
mod process;
mod query;
mod rule_set;
mod tag;
mod wifi;

pub use domain::{DomainItem, DomainKeywordItem, DomainRegexItem, GeositeItem};
pub use ip::{GeoIpItem, IpCidrItem, IpScope};
pub use network::{IpVersionItem, NetworkItem};
pub use port::{PortItem, PortRangeItem};
pub use process::{
    PackageNameItem, ProcessNameItem, ProcessPathItem, ProcessPathRegexItem, UserIdItem, UserItem,
};
pub use query::QueryTypeItem;
pub use rule_set::RuleSetItem;
pub use tag::{AuthUserItem, ClashModeItem, InboundItem, OutboundItem, ProtocolItem};
pub use wifi::{WifiBssidItem, WifiSsidItem};

pub(crate) use domain::{DomainSet, KeywordSet};

use std::fmt;

use vane_core::ConnContext;

/// A single match condition over the request context.
///
/// Implementations are immutable after construction and carry no
/// per-request state, so one item can serve any number of concurrent
/// evaluations.
pub trait RuleItem: fmt::Display + Send + Sync {
    /// Whether the request satisfies this condition.
    ///
    /// Never fails: a condition that cannot be evaluated for this request
    /// (no domain to test, unregistered rule-set tag, geo lookup miss)
    /// reports false.
    fn matches(&self, ctx: &mut ConnContext) -> bool;

    /// Whether this condition tests the resolved destination address,
    /// directly or through a referenced rule-set bundle.
    fn contains_destination_ip_rules(&self) -> bool {
        false
    }
}

/// Render a condition as `key=value` for one value or `key=[a b c]` for
/// several, the format rules print in logs.
pub(crate) fn write_values<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    key: &str,
    values: &[T],
) -> fmt::Result {
    if values.len() == 1 {
        return write!(f, "{key}={}", values[0]);
    }
    write!(f, "{key}=[")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{value}")?;
    }
    f.write_str("]")
}
