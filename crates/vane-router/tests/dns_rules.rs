//! Integration tests for the DNS side of the engine.
//!
//! These tests walk the two-phase protocol end to end:
//! - Server selection before any resolution has happened
//! - Deferral of destination-address conditions and the post-resolution
//!   confirm via `check_dns_addresses`
//! - Resuming the scan after a rejected rule
//! - Response metadata (cache, TTL, client subnet) carried by decisions
#![allow(clippy::tests_outside_test_module)]

use ipnet::IpNet;
use serde_json::json;
use vane_config::Config;
use vane_core::{ConnContext, RecordType};
use vane_router::Router;

// ============================================================================
// Helpers
// ============================================================================

fn router_from_json(config: serde_json::Value) -> Router {
    let config: Config = serde_json::from_value(config).unwrap();
    Router::from_config(&config).unwrap()
}

fn query_ctx(domain: &str) -> ConnContext {
    let mut ctx = ConnContext::new();
    ctx.domain = Some(domain.to_string());
    ctx.query_type = Some(RecordType::A);
    ctx
}

// ============================================================================
// Server selection
// ============================================================================

#[test]
fn test_dns_config_selects_servers() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {"domain_suffix": "corp.example", "server": "internal-dns"},
                {"query_type": "AAAA", "server": "v6-dns"}
            ],
            "final": "system"
        }
    }));
    assert_eq!(router.dns_rule_count(), 2);

    let decision = router.route_dns(&mut query_ctx("mail.corp.example"));
    assert_eq!(decision.server, "internal-dns");
    assert_eq!(decision.rule_index, Some(0));
    assert!(!decision.needs_destination_check);

    let mut ctx = query_ctx("www.example");
    ctx.query_type = Some(RecordType::AAAA);
    let decision = router.route_dns(&mut ctx);
    assert_eq!(decision.server, "v6-dns");
    assert_eq!(decision.rule_index, Some(1));

    let decision = router.route_dns(&mut query_ctx("www.example"));
    assert_eq!(decision.server, "system");
    assert_eq!(decision.rule_index, None);
}

#[test]
fn test_outbound_condition_matches_the_chosen_outbound() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {"outbound": "proxy-a", "server": "remote"},
                {"outbound": "any", "server": "catch"}
            ],
            "final": "local"
        }
    }));

    let mut ctx = query_ctx("www.example");
    ctx.outbound = Some("proxy-a".to_string());
    assert_eq!(router.route_dns(&mut ctx).server, "remote");

    let mut ctx = query_ctx("www.example");
    ctx.outbound = Some("other".to_string());
    assert_eq!(router.route_dns(&mut ctx).server, "catch");

    // "any" still needs an outbound to be set at all
    let decision = router.route_dns(&mut query_ctx("www.example"));
    assert_eq!(decision.server, "local");
}

// ============================================================================
// Deferred destination conditions
// ============================================================================

#[test]
fn test_destination_conditions_defer_until_addresses_arrive() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {"domain_suffix": "example.com", "ip_cidr": "10.0.0.0/8", "server": "trusted"}
            ],
            "final": "public"
        }
    }));

    // phase one matches tentatively, destination conditions pending
    let mut ctx = query_ctx("www.example.com");
    let decision = router.route_dns(&mut ctx);
    assert_eq!(decision.server, "trusted");
    assert_eq!(decision.rule_index, Some(0));
    assert!(decision.needs_destination_check);
    assert!(!ctx.ignores_destination_ip_cidr());

    // answers inside the cidr confirm the rule
    ctx.destination_addresses = vec!["10.1.1.1".parse().unwrap()];
    assert!(router.check_dns_addresses(0, &mut ctx));

    // answers outside it reject, and the scan resumes past the rule
    ctx.destination_addresses = vec!["8.8.8.8".parse().unwrap()];
    assert!(!router.check_dns_addresses(0, &mut ctx));
    let decision = router.route_dns_from(1, &mut ctx);
    assert_eq!(decision.server, "public");
    assert_eq!(decision.rule_index, None);
    assert!(!decision.needs_destination_check);

    // a domain that fails the non-deferred conditions never matches at all
    let decision = router.route_dns(&mut query_ctx("www.other.net"));
    assert_eq!(decision.server, "public");
}

#[test]
fn test_rejected_answers_resume_after_the_rule() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {"domain_suffix": "example.com", "ip_cidr": "10.0.0.0/8", "server": "a"},
                {"domain_suffix": "example.com", "ip_cidr": "172.16.0.0/12", "server": "b"},
                {"domain_suffix": "example.com", "server": "c"}
            ],
            "final": "public"
        }
    }));

    let mut ctx = query_ctx("www.example.com");
    let first = router.route_dns(&mut ctx);
    assert_eq!(first.rule_index, Some(0));
    assert!(first.needs_destination_check);

    // the answers satisfy rule 1 but not rule 0
    ctx.destination_addresses = vec!["172.20.0.1".parse().unwrap()];
    assert!(!router.check_dns_addresses(0, &mut ctx));

    let second = router.route_dns_from(1, &mut ctx);
    assert_eq!(second.rule_index, Some(1));
    assert_eq!(second.server, "b");
    assert!(second.needs_destination_check);
    assert!(router.check_dns_addresses(1, &mut ctx));

    // rule 2 has no destination conditions and needs no confirmation
    let third = router.route_dns_from(2, &mut ctx);
    assert_eq!(third.rule_index, Some(2));
    assert_eq!(third.server, "c");
    assert!(!third.needs_destination_check);
}

#[test]
fn test_source_conditions_do_not_defer() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {"source_ip_cidr": "192.168.0.0/16", "server": "lan-dns"},
                {"domain_suffix": "example.com", "ip_is_private": true, "server": "filtered"}
            ],
            "final": "public"
        }
    }));

    // source addresses are known before resolution; nothing to confirm
    let mut ctx = query_ctx("www.other.net");
    ctx.source_ip = Some("192.168.1.9".parse().unwrap());
    let decision = router.route_dns(&mut ctx);
    assert_eq!(decision.server, "lan-dns");
    assert!(!decision.needs_destination_check);

    // destination privacy is only knowable from the answers
    let decision = router.route_dns(&mut query_ctx("www.example.com"));
    assert_eq!(decision.server, "filtered");
    assert!(decision.needs_destination_check);
}

#[test]
fn test_rule_set_destination_shape_propagates_to_deferral() {
    let router = router_from_json(json!({
        "route": {
            "rule_set": [{
                "tag": "cdn",
                "rules": [{"ip_cidr": "151.101.0.0/16"}]
            }]
        },
        "dns": {
            "rules": [{"rule_set": "cdn", "server": "clean"}],
            "final": "public"
        }
    }));

    let mut ctx = query_ctx("assets.example");
    let decision = router.route_dns(&mut ctx);
    assert_eq!(decision.rule_index, Some(0));
    assert!(decision.needs_destination_check);

    ctx.destination_addresses = vec!["151.101.1.1".parse().unwrap()];
    assert!(router.check_dns_addresses(0, &mut ctx));

    ctx.destination_addresses = vec!["1.2.3.4".parse().unwrap()];
    assert!(!router.check_dns_addresses(0, &mut ctx));
    assert_eq!(router.route_dns_from(1, &mut ctx).server, "public");
}

#[test]
fn test_logical_dns_rules_defer_like_default_rules() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [{
                "type": "logical",
                "mode": "and",
                "rules": [
                    {"domain_suffix": "example.com"},
                    {"ip_cidr": "10.0.0.0/8"}
                ],
                "server": "filtered",
                "rewrite_ttl": 5
            }],
            "final": "public"
        }
    }));

    let mut ctx = query_ctx("www.example.com");
    let decision = router.route_dns(&mut ctx);
    assert_eq!(decision.server, "filtered");
    assert!(decision.needs_destination_check);
    assert_eq!(decision.rewrite_ttl, Some(5));

    ctx.destination_addresses = vec!["10.9.9.9".parse().unwrap()];
    assert!(router.check_dns_addresses(0, &mut ctx));

    ctx.destination_addresses = vec!["9.9.9.9".parse().unwrap()];
    assert!(!router.check_dns_addresses(0, &mut ctx));
}

// ============================================================================
// Response metadata
// ============================================================================

#[test]
fn test_response_metadata_flows_from_config() {
    let router = router_from_json(json!({
        "dns": {
            "rules": [
                {
                    "domain_suffix": "tracker.example",
                    "server": "sinkhole",
                    "disable_cache": true,
                    "rewrite_ttl": 10,
                    "client_subnet": "10.11.0.0/24"
                },
                {
                    "domain_suffix": "pinned.example",
                    "server": "local",
                    "client_subnet": "192.0.2.1"
                }
            ],
            "final": "public"
        }
    }));

    let decision = router.route_dns(&mut query_ctx("beacon.tracker.example"));
    assert_eq!(decision.server, "sinkhole");
    assert!(decision.disable_cache);
    assert_eq!(decision.rewrite_ttl, Some(10));
    assert_eq!(
        decision.client_subnet,
        Some("10.11.0.0/24".parse::<IpNet>().unwrap())
    );

    // a bare address widens to a full-length prefix
    let decision = router.route_dns(&mut query_ctx("www.pinned.example"));
    assert_eq!(
        decision.client_subnet,
        Some("192.0.2.1/32".parse::<IpNet>().unwrap())
    );

    let decision = router.route_dns(&mut query_ctx("www.example"));
    assert!(!decision.disable_cache);
    assert_eq!(decision.rewrite_ttl, None);
    assert_eq!(decision.client_subnet, None);
}
