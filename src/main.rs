//! ProxyScope - connect to databases, each through its own proxy
//!
//! Demonstrates scoped proxy selection: every configured database is probed
//! inside a scope bound to that database's proxy, while the probe itself
//! only ever talks to the shared connector.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyscope::{
    config::ConfigManager,
    metrics::ConnectorMetrics,
    probe::{do_via_proxy, DatabaseProbe, DatabaseRoute, ProbeReport},
    routing::registry,
    ProxyConnector,
};

/// CLI arguments for ProxyScope
#[derive(Parser, Debug)]
#[command(name = "proxyscope")]
#[command(about = "ProxyScope - reach each database through its own proxy")]
#[command(version)]
#[command(long_about = "
ProxyScope - reach each database through its own proxy

Every configured database is probed with a TCP session opened through the
proxy assigned to it. The selection is scoped to that probe only.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PROXYSCOPE_CONNECT_TIMEOUT   - Dial timeout (e.g., 10s)
  PROXYSCOPE_HANDSHAKE_TIMEOUT - Proxy negotiation timeout (e.g., 5s)
  PROXYSCOPE_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "proxyscope.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level (overrides config file)")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Dial timeout in seconds
    #[arg(long, help = "Dial timeout in seconds")]
    pub connect_timeout: Option<u64>,

    /// Probe all databases at the same time
    #[arg(long, help = "Probe all databases concurrently")]
    pub concurrent: bool,

    /// Print Prometheus metrics after probing
    #[arg(long, help = "Print connector metrics when done")]
    pub print_metrics: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    let log_level = if args.verbose {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };
    config.merge_with_cli_args(log_level, args.connect_timeout);

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&config.monitoring.log_level)?;

    info!("Starting ProxyScope v{}", env!("CARGO_PKG_VERSION"));

    // Unresolvable proxies are configuration errors, reported before any probe
    let routes = config
        .resolved_routes()
        .await
        .context("Proxy configuration is invalid")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Connect timeout: {:?}", config.connector.connect_timeout);
        info!("  Handshake timeout: {:?}", config.connector.handshake_timeout);
        for route in &routes {
            info!("  {} at {} via {}", route.target.name, route.target, route.proxy);
        }
        return Ok(());
    }

    // Exactly one resolver per process, installed before any connection
    registry::install_default()?;

    let metrics = Arc::new(ConnectorMetrics::new()?);
    let mut connector = ProxyConnector::from_installed(config.connector.clone())?;
    if config.monitoring.metrics_enabled {
        connector = connector.with_metrics(metrics.clone());
    }
    let probe = DatabaseProbe::new(Arc::new(connector));

    let results = if args.concurrent {
        let handles: Vec<_> = routes
            .iter()
            .cloned()
            .map(|route| {
                let probe = probe.clone();
                tokio::spawn(async move { probe_route(&probe, &route).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.context("Probe task failed")?);
        }
        results
    } else {
        let mut results = Vec::with_capacity(routes.len());
        for route in &routes {
            results.push(probe_route(&probe, route).await);
        }
        results
    };

    let mut failures = 0;
    for result in &results {
        match result {
            Ok(report) => println!("{}", report),
            Err(e) => {
                failures += 1;
                error!("{:#}", e);
            }
        }
    }

    if args.print_metrics {
        print!("{}", metrics.render());
    }

    if failures > 0 {
        bail!("{} of {} database probes failed", failures, results.len());
    }

    Ok(())
}

/// Probe one database inside a scope bound to its proxy
async fn probe_route(probe: &DatabaseProbe, route: &DatabaseRoute) -> Result<ProbeReport> {
    do_via_proxy(route.proxy.clone(), probe.probe(&route.target)).await
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
