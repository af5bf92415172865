//! webx-plug: the intranet end of the tunnel.

use std::path::PathBuf;

use clap::Parser;

use webx::config::{self, ConfigError, PlugConfig};
use webx::observability;

#[derive(Parser)]
#[command(name = "webx-plug")]
#[command(version, about = "Intranet plug proxying relayed requests to origins", long_about = None)]
struct Args {
    /// Hub URL to dial (ws:// or wss://).
    #[arg(long)]
    hub: Option<String>,

    /// Size limit in bytes; 0 is unlimited.
    #[arg(long)]
    limit: Option<i64>,

    /// Plug public signed cert (.pem).
    #[arg(long)]
    cert: Option<String>,

    /// Plug private key (.pem).
    #[arg(long)]
    key: Option<String>,

    /// Root CA pem used to verify the hub.
    #[arg(long)]
    ca: Option<String>,

    /// Redial waiting seconds.
    #[arg(long)]
    retry: Option<u64>,

    /// Comma-separated virtual hosts.
    #[arg(long)]
    hosts: Option<String>,

    /// Comma-separated origin URLs matching the virtual hosts.
    #[arg(long)]
    rhosts: Option<String>,

    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_plug_config(path)?,
        None => PlugConfig::default(),
    };
    if let Some(hub) = args.hub {
        config.hub_url = hub;
    }
    if let Some(limit) = args.limit {
        config.limit = limit;
    }
    if args.cert.is_some() {
        config.cert_file = args.cert;
    }
    if args.key.is_some() {
        config.key_file = args.key;
    }
    if args.ca.is_some() {
        config.ca_file = args.ca;
    }
    if let Some(retry) = args.retry {
        config.retry_wait_secs = retry;
    }
    if let Some(hosts) = args.hosts {
        config.hosts = split_list(&hosts);
    }
    if let Some(origins) = args.rhosts {
        config.origins = split_list(&origins);
    }
    config::validate_plug(&config).map_err(ConfigError::Validation)?;

    observability::init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        hub = %config.hub_url,
        "webx-plug starting"
    );

    webx::plug::run(config).await?;
    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}
