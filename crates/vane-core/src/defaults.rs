//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

/// Default log level when neither `RUST_LOG` nor the config set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default final outbound used when no routing rule matches.
pub const DEFAULT_FINAL_OUTBOUND: &str = "direct";
/// Default final DNS server used when no DNS rule matches.
pub const DEFAULT_FINAL_DNS_SERVER: &str = "local";
/// Default operating mode for callers that track one.
pub const DEFAULT_MODE: &str = "rule";
