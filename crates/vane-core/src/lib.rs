//! Core types shared across vane crates.
//!
//! This crate provides:
//! - The per-request [`ConnContext`] threaded through rule evaluation
//! - Scoped matching-state guards with guaranteed restore
//! - Small shared types (network, IP version, process identity, WiFi state)
//! - Default configuration values

pub mod context;
pub mod defaults;
pub mod types;

// Re-export commonly used items at crate root
pub use context::{ConnContext, IgnoreDestinationGuard, RuleCache, RuleSetFlagsGuard};
pub use types::{IpVersion, Network, ProcessInfo, WifiState};

/// DNS record type, re-exported for rule conditions and callers.
pub use hickory_proto::rr::RecordType;

/// Project name.
pub const PROJECT_NAME: &str = "vane";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
