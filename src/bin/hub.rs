//! webx-hub: the public end of the tunnel.

use std::path::PathBuf;

use clap::Parser;

use webx::config::{self, ConfigError, HubConfig};
use webx::observability;
use webx::HubServer;

#[derive(Parser)]
#[command(name = "webx-hub")]
#[command(version, about = "Public hub relaying client requests to plugs", long_about = None)]
struct Args {
    /// Public cert file (.pem) with CA chain and SANs.
    #[arg(long)]
    cert: Option<String>,

    /// Private key file (.pem).
    #[arg(long)]
    key: Option<String>,

    /// Hub resource path for plug upgrades.
    #[arg(long)]
    path: Option<String>,

    /// Comma-separated listen addresses for HTTP clients.
    #[arg(long)]
    http_ports: Option<String>,

    /// Comma-separated listen addresses for HTTPS clients.
    #[arg(long)]
    https_ports: Option<String>,

    /// Listen address for plugs.
    #[arg(long)]
    plug: Option<String>,

    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_hub_config(path)?,
        None => HubConfig::default(),
    };
    if args.cert.is_some() {
        config.cert_file = args.cert;
    }
    if args.key.is_some() {
        config.key_file = args.key;
    }
    if let Some(path) = args.path {
        config.plug_path = path;
    }
    if let Some(ports) = args.http_ports {
        config.http_ports = split_list(&ports);
    }
    if let Some(ports) = args.https_ports {
        config.https_ports = split_list(&ports);
    }
    if let Some(port) = args.plug {
        config.plug_port = port;
    }
    config::validate_hub(&config).map_err(ConfigError::Validation)?;

    observability::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "webx-hub starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::init_metrics(addr),
            Err(_) => tracing::error!(
                address = %config.observability.metrics_address,
                "invalid metrics address"
            ),
        }
    }

    HubServer::new(config).run().await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}
