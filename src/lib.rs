//! # vane
//!
//! A rule-matching engine for proxy routing and DNS dispatch.
//!
//! This crate ties the engine crates together behind one facade,
//! suitable for embedding the router in a proxy or for running the
//! bundled dry-run CLI.
//!
//! ## Crates
//!
//! - [`vane_core`] - Request context and shared types
//! - [`vane_config`] - Configuration loading and validation
//! - [`vane_router`] - Rule compilation and the routing engine
//! - [`vane_metrics`] - Prometheus-compatible metrics

pub use vane_config as config;
pub use vane_core as core;
pub use vane_metrics as metrics;
pub use vane_router as router;

pub mod cli;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use vane_config::{Config, load_config, validate_config};
    pub use vane_core::{ConnContext, Network};
    pub use vane_router::{DnsDecision, HotRouter, RouteDecision, Router};
}
