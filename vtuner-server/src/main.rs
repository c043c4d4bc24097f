//! vtuner-server: virtual tuner pooling for network and file capture devices.
//!
//! Discovers capture devices, groups them into merit-ranked pools and
//! exposes status and tuning over a JSON API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

mod config;
mod devices;
mod discovery;
mod logging;
mod web;

use config::{ConfigFile, DEFAULT_CONFIG_FILE};
use discovery::{DiscoverySupervisor, StaticDiscovery, UdpDiscovery};
use vtuner_core::TunerContext;

const DEFAULT_WEB_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_DISCOVERY_LISTEN: &str = "0.0.0.0:65001";

/// vtuner-server - Virtual tuner pooling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Address for the web API to listen on
    #[arg(long)]
    web_listen: Option<SocketAddr>,

    /// UDP address for tuner announcements
    #[arg(long)]
    discovery_listen: Option<SocketAddr>,

    /// Bind virtual tuners directly to devices instead of pools
    #[arg(long)]
    no_pools: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = match &config_path {
        Some(path) => match config::load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs")));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(7);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let web_listen = match args.web_listen.or_else(|| file_config.web_listen()) {
        Some(addr) => addr,
        None => DEFAULT_WEB_LISTEN.parse()?,
    };
    let discovery_listen = match args.discovery_listen.or_else(|| file_config.discovery_listen()) {
        Some(addr) => addr,
        None => DEFAULT_DISCOVERY_LISTEN.parse()?,
    };
    let use_pools = !args.no_pools && file_config.pools.use_pools.unwrap_or(true);
    let udp_enabled = file_config.discovery.enabled.unwrap_or(true);

    info!("vtuner-server starting...");
    info!("  Web API: {}", web_listen);
    info!(
        "  Discovery: {}",
        if udp_enabled {
            discovery_listen.to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!("  Pools: {}", if use_pools { "enabled" } else { "disabled" });

    let context = Arc::new(TunerContext::new(use_pools));
    devices::register_implementations(&context);
    config::apply_pool_settings(&context, &file_config);

    let mut supervisor = DiscoverySupervisor::new(
        file_config
            .discovery
            .stop_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(discovery::DEFAULT_STOP_TIMEOUT),
        file_config
            .discovery
            .stop_attempts
            .unwrap_or(discovery::DEFAULT_STOP_ATTEMPTS),
    );

    let static_discovery = StaticDiscovery::from_config(Arc::clone(&context), &file_config);
    supervisor.spawn("static", |shutdown| static_discovery.run(shutdown));

    if udp_enabled {
        match UdpDiscovery::bind(Arc::clone(&context), discovery_listen).await {
            Ok(udp) => supervisor.spawn("udp", |shutdown| udp.run(shutdown)),
            // The server stays useful with configured devices only.
            Err(e) => warn!("UDP discovery unavailable: {}", e),
        }
    }

    let web_context = Arc::clone(&context);
    let web_task = tokio::spawn(async move {
        match web::start_web_server(web_listen, web_context).await {
            Ok(_) => info!("Web API server stopped"),
            Err(e) => error!("Web API error: {}", e),
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    supervisor.stop().await;
    web_task.abort();

    let bound = context.pools().bindings();
    if !bound.is_empty() {
        warn!("{} virtual tuner(s) still bound at shutdown", bound.len());
    }

    Ok(())
}
