//! Per-request metadata threaded through rule evaluation.

use std::net::IpAddr;
use std::ops::{Deref, DerefMut};

use hickory_proto::rr::RecordType;

use crate::types::{IpVersion, Network, ProcessInfo, WifiState};

/// Metadata for one connection attempt or DNS query.
///
/// Built by the caller, mutated during evaluation (memoized lookups and
/// deferred-matching flags) and discarded once a decision is made. A context
/// belongs to exactly one in-flight request; it must never be shared between
/// concurrent requests.
#[derive(Debug, Default)]
pub struct ConnContext {
    /// Tag of the listener the request arrived on.
    pub inbound: Option<String>,
    /// Transport network.
    pub network: Option<Network>,
    /// Sniffed application protocol ("tls", "http", "quic", ...).
    pub protocol: Option<String>,
    /// Target domain, when the request names one.
    pub domain: Option<String>,
    /// Target IP, when the request carries a literal address.
    pub destination_ip: Option<IpAddr>,
    /// Resolved destination addresses, attached after DNS resolution.
    pub destination_addresses: Vec<IpAddr>,
    /// Target port.
    pub destination_port: u16,
    /// Client source address.
    pub source_ip: Option<IpAddr>,
    /// Client source port.
    pub source_port: u16,
    /// Authenticated user on the inbound, if any.
    pub auth_user: Option<String>,
    /// Process that originated the request, when resolvable.
    pub process: Option<ProcessInfo>,
    /// DNS query type, for DNS requests.
    pub query_type: Option<RecordType>,
    /// Requested or implied address family.
    pub ip_version: Option<IpVersion>,
    /// Outbound already selected for the connection that triggered a query.
    pub outbound: Option<String>,
    /// Active operating mode ("rule", "global", "direct").
    pub mode: Option<String>,
    /// WiFi network the device is attached to, when known.
    pub wifi: Option<WifiState>,

    ignore_destination_ip_cidr: bool,
    rule_set_ip_cidr_match_source: bool,
    rule_set_ip_cidr_accept_empty: bool,
    cache: RuleCache,
}

impl ConnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while destination-IP conditions must be treated as absent from
    /// the conjunction (the deferred-matching phase of DNS rules).
    pub fn ignores_destination_ip_cidr(&self) -> bool {
        self.ignore_destination_ip_cidr
    }

    /// True while IP conditions inside a rule-set bundle test the source
    /// address instead of the destination.
    pub fn rule_set_matches_source_ip(&self) -> bool {
        self.rule_set_ip_cidr_match_source
    }

    /// True while IP conditions inside a rule-set bundle accept a request
    /// with no known destination address.
    pub fn rule_set_accepts_empty_ip(&self) -> bool {
        self.rule_set_ip_cidr_accept_empty
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RuleCache {
        &mut self.cache
    }

    /// Drop memoized per-request lookups.
    ///
    /// Invoked before each attempted sub-rule of a logical rule so sibling
    /// sub-rules never observe each other's cached lookups, and before each
    /// top-level rule by the router.
    pub fn reset_rule_cache(&mut self) {
        self.cache.reset();
    }
}

/// Memoized per-request lookups.
///
/// Items stash request-scoped lookup results here (currently geo country
/// codes) so sibling conditions in one rule do not repeat them. [`reset`]
/// clears the memos and bumps a generation counter, which makes the reset
/// protocol observable to tests and to items that stamp their own memos.
///
/// [`reset`]: RuleCache::reset
#[derive(Debug, Default)]
pub struct RuleCache {
    generation: u64,
    source_country: Option<Option<String>>,
    destination_country: Option<Option<String>>,
}

impl RuleCache {
    /// Memoized country code for the source address.
    ///
    /// Outer `None` means no lookup has run since the last reset; inner
    /// `None` records a lookup miss.
    pub fn source_country(&self) -> Option<Option<&str>> {
        self.source_country.as_ref().map(|code| code.as_deref())
    }

    pub fn set_source_country(&mut self, code: Option<String>) {
        self.source_country = Some(code);
    }

    /// Memoized country code for the destination address.
    pub fn destination_country(&self) -> Option<Option<&str>> {
        self.destination_country.as_ref().map(|code| code.as_deref())
    }

    pub fn set_destination_country(&mut self, code: Option<String>) {
        self.destination_country = Some(code);
    }

    /// Number of resets seen by this request so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Clear all memos and bump the generation counter.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.source_country = None;
        self.destination_country = None;
    }
}

/// Scoped "destination-IP conditions are absent" marker.
///
/// Sets the flag on construction and restores the previous value when
/// dropped, so every exit path out of a deferred match (including
/// short-circuited ones) leaves the context as it was.
pub struct IgnoreDestinationGuard<'a> {
    ctx: &'a mut ConnContext,
    previous: bool,
}

impl<'a> IgnoreDestinationGuard<'a> {
    pub fn new(ctx: &'a mut ConnContext) -> Self {
        let previous = ctx.ignore_destination_ip_cidr;
        ctx.ignore_destination_ip_cidr = true;
        Self { ctx, previous }
    }
}

impl Deref for IgnoreDestinationGuard<'_> {
    type Target = ConnContext;

    fn deref(&self) -> &ConnContext {
        self.ctx
    }
}

impl DerefMut for IgnoreDestinationGuard<'_> {
    fn deref_mut(&mut self) -> &mut ConnContext {
        self.ctx
    }
}

impl Drop for IgnoreDestinationGuard<'_> {
    fn drop(&mut self) {
        self.ctx.ignore_destination_ip_cidr = self.previous;
    }
}

/// Scoped rule-set IP matching flags, restored on drop.
pub struct RuleSetFlagsGuard<'a> {
    ctx: &'a mut ConnContext,
    previous: (bool, bool),
}

impl<'a> RuleSetFlagsGuard<'a> {
    pub fn new(ctx: &'a mut ConnContext, match_source: bool, accept_empty: bool) -> Self {
        let previous = (
            ctx.rule_set_ip_cidr_match_source,
            ctx.rule_set_ip_cidr_accept_empty,
        );
        ctx.rule_set_ip_cidr_match_source = match_source;
        ctx.rule_set_ip_cidr_accept_empty = accept_empty;
        Self { ctx, previous }
    }
}

impl Deref for RuleSetFlagsGuard<'_> {
    type Target = ConnContext;

    fn deref(&self) -> &ConnContext {
        self.ctx
    }
}

impl DerefMut for RuleSetFlagsGuard<'_> {
    fn deref_mut(&mut self) -> &mut ConnContext {
        self.ctx
    }
}

impl Drop for RuleSetFlagsGuard<'_> {
    fn drop(&mut self) {
        self.ctx.rule_set_ip_cidr_match_source = self.previous.0;
        self.ctx.rule_set_ip_cidr_accept_empty = self.previous.1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_cleared() {
        let ctx = ConnContext::new();
        assert!(!ctx.ignores_destination_ip_cidr());
        assert!(!ctx.rule_set_matches_source_ip());
        assert!(!ctx.rule_set_accepts_empty_ip());
        assert_eq!(ctx.cache().generation(), 0);
    }

    #[test]
    fn ignore_guard_sets_and_restores() {
        let mut ctx = ConnContext::new();
        {
            let guard = IgnoreDestinationGuard::new(&mut ctx);
            assert!(guard.ignores_destination_ip_cidr());
        }
        assert!(!ctx.ignores_destination_ip_cidr());
    }

    #[test]
    fn ignore_guard_restores_previous_when_nested() {
        let mut ctx = ConnContext::new();
        let mut outer = IgnoreDestinationGuard::new(&mut ctx);
        {
            let inner = IgnoreDestinationGuard::new(&mut outer);
            assert!(inner.ignores_destination_ip_cidr());
        }
        // inner drop must restore the outer guard's state, not clear it
        assert!(outer.ignores_destination_ip_cidr());
        drop(outer);
        assert!(!ctx.ignores_destination_ip_cidr());
    }

    #[test]
    fn rule_set_flags_guard_restores_both() {
        let mut ctx = ConnContext::new();
        {
            let guard = RuleSetFlagsGuard::new(&mut ctx, true, true);
            assert!(guard.rule_set_matches_source_ip());
            assert!(guard.rule_set_accepts_empty_ip());
        }
        assert!(!ctx.rule_set_matches_source_ip());
        assert!(!ctx.rule_set_accepts_empty_ip());
    }

    #[test]
    fn cache_reset_clears_memos_and_bumps_generation() {
        let mut ctx = ConnContext::new();
        ctx.cache_mut().set_source_country(Some("DE".into()));
        ctx.cache_mut().set_destination_country(None);
        assert_eq!(ctx.cache().source_country(), Some(Some("DE")));
        assert_eq!(ctx.cache().destination_country(), Some(None));

        ctx.reset_rule_cache();
        assert_eq!(ctx.cache().generation(), 1);
        assert_eq!(ctx.cache().source_country(), None);
        assert_eq!(ctx.cache().destination_country(), None);

        ctx.reset_rule_cache();
        assert_eq!(ctx.cache().generation(), 2);
    }

    #[test]
    fn context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ConnContext>();
    }
}
