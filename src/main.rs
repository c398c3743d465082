//! ts-proxyd: expose a local service on an overlay network node.
//!
//! # Architecture Overview
//!
//! ```text
//!     Overlay peer
//!     ────────────┐
//!                 ▼
//!          ┌─────────────┐     ┌──────────────────────────┐
//!          │  listener   │────▶│ tcp: ConnectionForwarder │──┐
//!          │ plain / TLS │     └──────────────────────────┘  │
//!          │  / public   │     ┌──────────────────────────┐  ├──▶ Upstream
//!          └─────────────┘────▶│ http: identity → redirect│──┘
//!                              │  → headers → forward     │
//!                              └──────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ts_proxy::config::loader::read_config;
use ts_proxy::config::{ProxyConfig, UpstreamNetwork};
use ts_proxy::lifecycle::signals::spawn_signal_handler;
use ts_proxy::observability::{logging, metrics};
use ts_proxy::overlay::{LocalOverlay, StaticIdentityProvider};
use ts_proxy::ProxyCore;

#[derive(Parser, Debug)]
#[command(name = "ts-proxyd", version)]
#[command(
    about = "Identity-aware proxy from an overlay network node to a local service",
    long_about = None
)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upstream network (tcp or unix)
    #[arg(long)]
    network: Option<UpstreamNetwork>,

    /// Upstream address to forward to
    #[arg(short = 'a', long)]
    address: Option<String>,

    /// Overlay hostname of this node
    #[arg(short = 'n', long)]
    hostname: Option<String>,

    /// Expose the service to the public internet
    #[arg(short = 'f', long)]
    funnel: bool,

    /// Serve over TLS inside the overlay
    #[arg(short = 't', long)]
    tls: bool,

    /// Directory for node state
    #[arg(short = 's', long)]
    state_dir: Option<PathBuf>,

    /// Listen address (defaults to :443 or :80 in HTTP mode)
    #[arg(long = "addr")]
    bind: Option<String>,

    /// Mediate HTTP and inject caller identity headers
    #[arg(long)]
    http: bool,

    /// Close idle TCP connections after this many seconds (0 disables)
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(network) = self.network {
            config.upstream.network = network;
        }
        if let Some(address) = self.address {
            config.upstream.address = address;
        }
        if let Some(hostname) = self.hostname {
            config.node.hostname = hostname;
        }
        if let Some(state_dir) = self.state_dir {
            config.node.state_dir = Some(state_dir);
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = Some(bind);
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.timeouts.tcp_idle_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        config.listener.public_exposure |= self.funnel;
        config.listener.allow_public_exposure |= self.funnel;
        config.listener.encryption |= self.tls;
        config.listener.http |= self.http;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ts-proxyd starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let overlay = Arc::new(LocalOverlay::from_config(&config));
    let identity = Arc::new(StaticIdentityProvider::from_config(&config.identities)?);
    let core = ProxyCore::new(config, overlay, identity)?;

    spawn_signal_handler(core.shutdown_handle());
    core.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
