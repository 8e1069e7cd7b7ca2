//! CLI subcommands for the vane binary.
//!
//! Every subcommand loads a configuration file, compiles it into a
//! [`Router`], and performs one synchronous dry-run operation against
//! it. Errors bubble up to `main` and are printed exactly once.

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::Args;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vane_config::{Config, ConfigError, LogConfig, load_config, validate_config};
use vane_core::{ConnContext, Network, RecordType, defaults};
use vane_router::{Router, RuleError};

/// Errors surfaced by the CLI subcommands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Arguments for `vane check`.
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,
}

/// Arguments for `vane route`.
#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Destination domain of the connection
    #[arg(long)]
    pub domain: Option<String>,

    /// Destination address, literal or already resolved
    #[arg(long)]
    pub destination_ip: Option<IpAddr>,

    /// Destination port
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Source address of the connection
    #[arg(long)]
    pub source_ip: Option<IpAddr>,

    /// Source port
    #[arg(long, default_value_t = 0)]
    pub source_port: u16,

    /// Transport network (tcp or udp)
    #[arg(long)]
    pub network: Option<Network>,

    /// Inbound tag the connection arrived on
    #[arg(long)]
    pub inbound: Option<String>,

    /// Sniffed application protocol
    #[arg(long)]
    pub protocol: Option<String>,

    /// Authenticated user
    #[arg(long)]
    pub user: Option<String>,

    /// Print the decision as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `vane dns`.
#[derive(Args, Debug, Clone)]
pub struct DnsArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Queried domain
    #[arg(long)]
    pub domain: Option<String>,

    /// DNS query type mnemonic (A, AAAA, HTTPS, ...)
    #[arg(long, default_value = "A")]
    pub qtype: RecordType,

    /// Inbound tag the query arrived on
    #[arg(long)]
    pub inbound: Option<String>,

    /// Outbound picked for the connection that triggered the query
    #[arg(long)]
    pub outbound: Option<String>,

    /// Source address of the querying client
    #[arg(long)]
    pub source_ip: Option<IpAddr>,

    /// Resolved answer address used to confirm deferred destination
    /// conditions (repeatable)
    #[arg(long = "answer-ip")]
    pub answer_ip: Vec<IpAddr>,

    /// Print the decision as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `vane format`.
#[derive(Args, Debug, Clone)]
pub struct FormatArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,
}

/// Load, validate, and compile a configuration, reporting any error.
pub fn check(args: CheckArgs) -> Result<(), CliError> {
    let config = load_and_validate(&args.config)?;
    init_tracing(&config.log);

    let router = Router::from_config(&config)?;
    info!(
        rules = router.rule_count(),
        dns_rules = router.dns_rule_count(),
        rule_sets = router.rule_sets().len(),
        "configuration compiled"
    );
    println!(
        "{}: ok ({} route rules, {} dns rules, {} rule-sets)",
        args.config.display(),
        router.rule_count(),
        router.dns_rule_count(),
        router.rule_sets().len()
    );
    Ok(())
}

/// Dry-run one connection against the route rules and print the decision.
pub fn route(args: RouteArgs) -> Result<(), CliError> {
    let config = load_and_validate(&args.config)?;
    init_tracing(&config.log);

    let router = Router::from_config(&config)?;

    let mut ctx = ConnContext::new();
    ctx.inbound = args.inbound;
    ctx.protocol = args.protocol;
    ctx.auth_user = args.user;
    ctx.network = args.network;
    ctx.domain = args.domain;
    ctx.destination_ip = args.destination_ip;
    ctx.destination_port = args.port;
    ctx.source_ip = args.source_ip;
    ctx.source_port = args.source_port;

    let decision = router.route(&mut ctx);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }
    match decision.rule_index {
        Some(index) => println!(
            "outbound {} via rule[{}] {}",
            decision.outbound,
            index,
            router.rules()[index]
        ),
        None => println!("outbound {} via final", decision.outbound),
    }
    Ok(())
}

/// Dry-run one DNS query, walking both match phases.
///
/// The first phase picks a server while ignoring destination-address
/// conditions. When the chosen rule defers such conditions, the
/// `--answer-ip` addresses stand in for the server's response and the
/// deferred conditions are re-checked; on a reject the scan resumes
/// after the rejected rule.
pub fn dns(args: DnsArgs) -> Result<(), CliError> {
    let config = load_and_validate(&args.config)?;
    init_tracing(&config.log);

    let router = Router::from_config(&config)?;

    let mut ctx = ConnContext::new();
    ctx.inbound = args.inbound;
    ctx.outbound = args.outbound;
    ctx.domain = args.domain;
    ctx.query_type = Some(args.qtype);
    ctx.source_ip = args.source_ip;

    let mut decision = router.route_dns(&mut ctx);
    let mut confirmed = false;
    if !args.answer_ip.is_empty() {
        ctx.destination_addresses = args.answer_ip.clone();
        while decision.needs_destination_check {
            let Some(index) = decision.rule_index else { break };
            if router.check_dns_addresses(index, &mut ctx) {
                confirmed = true;
                break;
            }
            println!("dns rule[{}] rejected the answer addresses, continuing", index);
            decision = router.route_dns_from(index + 1, &mut ctx);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }
    match decision.rule_index {
        Some(index) => println!(
            "server {} via dns rule[{}] {}",
            decision.server,
            index,
            router.dns_rules()[index]
        ),
        None => println!("server {} via final", decision.server),
    }
    if confirmed {
        println!(
            "destination conditions confirmed against {} answer address(es)",
            args.answer_ip.len()
        );
    } else if decision.needs_destination_check {
        println!("tentative: destination conditions deferred, confirm with --answer-ip");
    }
    if decision.disable_cache {
        println!("disable_cache");
    }
    if let Some(ttl) = decision.rewrite_ttl {
        println!("rewrite_ttl {}", ttl);
    }
    if let Some(subnet) = decision.client_subnet {
        println!("client_subnet {}", subnet);
    }
    Ok(())
}

/// Normalize a configuration file and reprint it as pretty JSON.
pub fn format(args: FormatArgs) -> Result<(), CliError> {
    let config = load_and_validate(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_and_validate(path: &Path) -> Result<Config, CliError> {
    let config = load_config(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Initialize tracing once, preferring `RUST_LOG` over the config level.
fn init_tracing(log: &LogConfig) {
    let fallback = log.level.as_deref().unwrap_or(defaults::DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
