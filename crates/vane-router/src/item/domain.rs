//! Domain name conditions.
//!
//! Exact and suffix sets share an FxHashSet with label-stripping lookup
//! (O(1) + O(k) in the label count); keywords run through an Aho-Corasick
//! automaton (O(m) in the domain length, independent of keyword count);
//! regexes are tried in order.

use std::fmt;
use std::sync::Arc;

use aho_corasick::AhoCorasick;
use regex::Regex;
use rustc_hash::FxHashSet;
use vane_core::ConnContext;

use crate::error::RuleError;
use crate::item::{RuleItem, write_values};
use crate::source::GeositeSource;

/// Exact + suffix domain set shared by `domain`/`domain_suffix` conditions
/// and geosite categories.
///
/// Exact entries are stored as-is. Suffixes are stored with a leading dot
/// (".example.com") and once more bare, so a suffix matches the domain
/// itself and every subdomain. Lookup tries the exact entry first, then
/// strips labels left-to-right.
#[derive(Debug, Default)]
pub(crate) struct DomainSet {
    set: FxHashSet<String>,
}

impl DomainSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_exact(&mut self, domain: &str) {
        self.set.insert(domain.to_ascii_lowercase());
    }

    /// A leading dot on the suffix is accepted and normalized away, so
    /// `.example.com` and `example.com` produce the same entries.
    pub(crate) fn add_suffix(&mut self, suffix: &str) {
        let stripped = suffix.strip_prefix('.').unwrap_or(suffix);
        let lower = stripped.to_ascii_lowercase();
        self.set.insert(format!(".{lower}"));
        self.set.insert(lower);
    }

    pub(crate) fn matches(&self, domain: &str) -> bool {
        let lower = domain.to_ascii_lowercase();
        if self.set.contains(lower.as_str()) {
            return true;
        }
        let mut pos = 0;
        while let Some(dot) = lower[pos..].find('.') {
            let suffix = &lower[pos + dot..];
            if self.set.contains(suffix) {
                return true;
            }
            pos += dot + 1;
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Keyword set over an Aho-Corasick automaton, shared by `domain_keyword`
/// conditions and geosite categories.
pub(crate) struct KeywordSet {
    ac: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordSet {
    pub(crate) fn new(keywords: &[String]) -> Self {
        let lower: Vec<String> = keywords.iter().map(|k| k.to_ascii_lowercase()).collect();
        let ac = AhoCorasick::new(&lower).expect("valid patterns");
        Self { ac, keywords: lower }
    }

    pub(crate) fn matches(&self, domain: &str) -> bool {
        self.ac.is_match(&domain.to_ascii_lowercase())
    }

    pub(crate) fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl fmt::Debug for KeywordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordSet")
            .field("keywords", &self.keywords)
            .finish()
    }
}

/// The `domain` and `domain_suffix` condition groups; one item covers both.
pub struct DomainItem {
    set: DomainSet,
    domains: Vec<String>,
    suffixes: Vec<String>,
}

impl DomainItem {
    pub fn new(domains: Vec<String>, suffixes: Vec<String>) -> Self {
        let mut set = DomainSet::new();
        for domain in &domains {
            set.add_exact(domain);
        }
        for suffix in &suffixes {
            set.add_suffix(suffix);
        }
        Self {
            set,
            domains,
            suffixes,
        }
    }
}

impl RuleItem for DomainItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.domain
            .as_deref()
            .is_some_and(|domain| self.set.matches(domain))
    }
}

impl fmt::Display for DomainItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.domains.is_empty() {
            write_values(f, "domain", &self.domains)?;
            if !self.suffixes.is_empty() {
                f.write_str(" ")?;
            }
        }
        if !self.suffixes.is_empty() {
            write_values(f, "domain_suffix", &self.suffixes)?;
        }
        Ok(())
    }
}

/// The `domain_keyword` condition group.
pub struct DomainKeywordItem {
    set: KeywordSet,
}

impl DomainKeywordItem {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            set: KeywordSet::new(keywords),
        }
    }
}

impl RuleItem for DomainKeywordItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.domain
            .as_deref()
            .is_some_and(|domain| self.set.matches(domain))
    }
}

impl fmt::Display for DomainKeywordItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "domain_keyword", self.set.keywords())
    }
}

/// The `domain_regex` condition group. Patterns are validated at
/// construction; matching tries them in order.
#[derive(Debug)]
pub struct DomainRegexItem {
    regexes: Vec<Regex>,
}

impl DomainRegexItem {
    pub fn new(patterns: &[String]) -> Result<Self, RuleError> {
        let regexes = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| RuleError::InvalidCondition {
                    field: "domain_regex",
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { regexes })
    }
}

impl RuleItem for DomainRegexItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.domain
            .as_deref()
            .is_some_and(|domain| self.regexes.iter().any(|regex| regex.is_match(domain)))
    }
}

impl fmt::Display for DomainRegexItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "domain_regex", &self.regexes)
    }
}

/// The `geosite` condition group: membership of the request domain in a
/// named category of the configured geosite source.
pub struct GeositeItem {
    codes: Vec<String>,
    source: Arc<dyn GeositeSource>,
}

impl GeositeItem {
    pub fn new(codes: &[String], source: Arc<dyn GeositeSource>) -> Self {
        let codes = codes.iter().map(|c| c.to_ascii_lowercase()).collect();
        Self { codes, source }
    }
}

impl RuleItem for GeositeItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let Some(domain) = ctx.domain.as_deref() else {
            return false;
        };
        self.codes
            .iter()
            .any(|code| self.source.domain_in_category(domain, code))
    }
}

impl fmt::Display for GeositeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "geosite", &self.codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_domain(domain: &str) -> ConnContext {
        let mut ctx = ConnContext::new();
        ctx.domain = Some(domain.to_string());
        ctx
    }

    #[test]
    fn domain_set_exact_match() {
        let mut set = DomainSet::new();
        set.add_exact("api.example.com");
        assert!(set.matches("api.example.com"));
        assert!(set.matches("API.EXAMPLE.COM"));
        assert!(!set.matches("example.com"));
        assert!(!set.matches("other.api.example.com"));
    }

    #[test]
    fn domain_set_suffix_match() {
        let mut set = DomainSet::new();
        set.add_suffix("apple.com");
        assert!(set.matches("apple.com"));
        assert!(set.matches("store.apple.com"));
        assert!(set.matches("cdn.store.apple.com"));
        assert!(!set.matches("notapple.com"));
        assert!(!set.matches("com"));
    }

    #[test]
    fn domain_set_suffix_leading_dot_normalized() {
        let mut set = DomainSet::new();
        set.add_suffix(".example.com");
        assert!(set.matches("example.com"));
        assert!(set.matches("sub.example.com"));
        assert!(!set.matches("notexample.com"));
    }

    #[test]
    fn domain_item_matches_suffix_not_sibling() {
        let item = DomainItem::new(vec![], vec!["example.com".into()]);
        assert!(item.matches(&mut ctx_with_domain("www.example.com")));
        assert!(!item.matches(&mut ctx_with_domain("example.org")));
        assert!(!item.matches(&mut ConnContext::new()));
    }

    #[test]
    fn keyword_item_matches_substring() {
        let item = DomainKeywordItem::new(&["google".into(), "facebook".into()]);
        assert!(item.matches(&mut ctx_with_domain("www.google.com")));
        assert!(item.matches(&mut ctx_with_domain("GOOGLE.co.jp")));
        assert!(!item.matches(&mut ctx_with_domain("www.apple.com")));
    }

    #[test]
    fn regex_item_rejects_bad_pattern() {
        let err = DomainRegexItem::new(&["([invalid".into()]).unwrap_err();
        assert!(err.to_string().starts_with("domain_regex: "));
    }

    #[test]
    fn regex_item_matches() {
        let item = DomainRegexItem::new(&[r"^cdn\d+\.example\.com$".into()]).unwrap();
        assert!(item.matches(&mut ctx_with_domain("cdn7.example.com")));
        assert!(!item.matches(&mut ctx_with_domain("cdn.example.com")));
    }

    #[test]
    fn display_formats() {
        let item = DomainItem::new(vec!["a.com".into()], vec!["b.com".into(), "c.com".into()]);
        assert_eq!(item.to_string(), "domain=a.com domain_suffix=[b.com c.com]");
        let keywords = DomainKeywordItem::new(&["ads".into()]);
        assert_eq!(keywords.to_string(), "domain_keyword=ads");
    }
}
