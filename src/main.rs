//! Unified vane CLI.
//!
//! This binary provides a unified interface to the vane rule engine:
//! - `vane check` - Validate a configuration file and compile its rules
//! - `vane route` - Dry-run one connection against the route rules
//! - `vane dns` - Dry-run one DNS query, walking both match phases
//! - `vane format` - Normalize a configuration file and reprint it

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use vane::cli::{self, CheckArgs, DnsArgs, FormatArgs, RouteArgs};

/// Vane unified CLI.
#[derive(Parser)]
#[command(
    name = "vane",
    version,
    about = "Rule-matching engine for proxy routing and DNS dispatch",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and compile its rules.
    #[command(name = "check")]
    Check(CheckArgs),

    /// Dry-run one connection against the route rules.
    #[command(name = "route")]
    Route(RouteArgs),

    /// Dry-run one DNS query, including deferred destination checks.
    #[command(name = "dns")]
    Dns(DnsArgs),

    /// Normalize a configuration file and reprint it.
    #[command(name = "format", alias = "fmt")]
    Format(FormatArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check(args) => cli::check(args),
        Commands::Route(args) => cli::route(args),
        Commands::Dns(args) => cli::dns(args),
        Commands::Format(args) => cli::format(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
