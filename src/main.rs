//! Pooled caching HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────┐
//!                     │                 CACHING PROXY                 │
//!                     │                                               │
//!   Client Request    │  ┌──────────┐   ┌──────────┐   ┌──────────┐   │
//!   ──────────────────┼─▶│   net    │──▶│  engine  │──▶│  upstream│───┼──▶ Origin
//!                     │  │ listener │   │  + cache │   │   pool   │   │    Server
//!                     │  └──────────┘   └──────────┘   └──────────┘   │
//!   Client Response   │        ▲              │                       │
//!   ◀─────────────────┼────────┴── write ◀────┘                       │
//!                     │           queues                              │
//!                     │                                               │
//!                     │  config · observability · admin · lifecycle   │
//!                     └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use pooled_proxy::admin::{self, AdminState};
use pooled_proxy::config::loader::load_config;
use pooled_proxy::config::validation::validate_config;
use pooled_proxy::config::ProxyConfig;
use pooled_proxy::lifecycle::signals::wait_for_shutdown;
use pooled_proxy::observability::{logging, metrics};
use pooled_proxy::{ProxyServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "pooled-proxy", version, about = "Caching HTTP proxy with a bounded upstream pool")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept clients on.
    #[arg(long)]
    listen_host: Option<String>,

    #[arg(long)]
    listen_port: Option<u16>,

    /// Origin server host.
    #[arg(long)]
    upstream_host: Option<String>,

    #[arg(long)]
    upstream_port: Option<u16>,

    /// Number of persistent upstream connections.
    #[arg(long)]
    pool_size: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(host) = &self.listen_host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.listen_port {
            config.listener.port = port;
        }
        if let Some(host) = &self.upstream_host {
            config.upstream.host = host.clone();
        }
        if let Some(port) = self.upstream_port {
            config.upstream.port = port;
        }
        if let Some(pool_size) = self.pool_size {
            config.upstream.pool_size = pool_size;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    args.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pooled-proxy starting");
    tracing::info!(
        listen = %config.listener.address(),
        upstream = %config.upstream.address(),
        pool_size = config.upstream.pool_size,
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let server = ProxyServer::new(config.clone());

    if config.admin.enabled {
        let admin_listener = tokio::net::TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(config.admin.api_key.as_str(), server.stats());
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    server.serve(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
