//! Rule-based routing engine for vane.
//!
//! Compiles route rules, DNS rules and named rule-set bundles from their
//! configuration forms and evaluates them against a per-request context.
//! Rules are conjunctions of condition groups (domain, CIDR, port, process,
//! geo lookup and more), optionally combined through AND/OR logical rules
//! of arbitrary depth; evaluation is strictly ordered and the first match
//! wins.
//!
//! # Architecture
//!
//! - **Items**: one [`RuleItem`] per condition kind, built once and shared
//!   (`DomainItem` over an FxHashSet, `DomainKeywordItem` over Aho-Corasick,
//!   `IpCidrItem` over sorted prefix lists, `GeoIpItem` over a MaxMind DB)
//! - **Rules**: [`Rule`] / [`DnsRule`] compile conditions into partitioned
//!   item sets; DNS rules evaluate in two phases around resolution
//! - **Rule-sets**: [`RuleSet`] bundles served through a lock-free
//!   [`RuleSetRegistry`]
//! - **Router**: [`Router`] holds the ordered rule lists; [`HotRouter`]
//!   swaps them atomically at runtime
//!
//! # Example
//!
//! ```
//! use vane_config::RuleConfig;
//! use vane_core::ConnContext;
//! use vane_router::Router;
//!
//! let rule: RuleConfig = serde_json::from_value(serde_json::json!({
//!     "domain_suffix": "example.com",
//!     "network": "tcp",
//!     "outbound": "proxy"
//! }))
//! .unwrap();
//!
//! let mut builder = Router::builder();
//! builder.rule(rule).final_outbound("direct");
//! let router = builder.build().unwrap();
//!
//! let mut ctx = ConnContext::new();
//! ctx.domain = Some("www.example.com".to_string());
//! ctx.network = Some(vane_core::Network::Tcp);
//! assert_eq!(router.route(&mut ctx).outbound, "proxy");
//! ```

pub mod dns;
pub mod error;
#[cfg(feature = "geoip")]
pub mod geoip;
pub mod item;
pub mod router;
pub mod rule;
pub mod rule_set;
pub mod source;

pub use dns::{DefaultDnsRule, DnsRule, LogicalDnsRule};
pub use error::RuleError;
#[cfg(feature = "geoip")]
pub use geoip::MaxMindSource;
pub use item::RuleItem;
pub use router::{DnsDecision, HotRouter, RouteDecision, Router, RouterBuilder};
pub use rule::{DefaultRule, LogicalMode, LogicalRule, Rule};
pub use rule_set::{RuleSet, RuleSetRegistry};
pub use source::{GeoIpSource, GeositeSource, RouterServices, StaticGeosite};
