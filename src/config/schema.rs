//! Configuration schema definitions.
//!
//! This module defines the configuration of both tunnel processes. All
//! types derive Serde traits for deserialization from config files; the
//! binaries overlay CLI flags on top.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::loader::ConfigError;
use crate::protocol;

/// Hub process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// Public certificate chain (PEM). TLS listeners are enabled when both
    /// `cert_file` and `key_file` are set.
    pub cert_file: Option<String>,

    /// Private key (PEM).
    pub key_file: Option<String>,

    /// Resource path plugs upgrade on.
    pub plug_path: String,

    /// Listen addresses for plain HTTP clients. A bare `:port` binds all
    /// interfaces.
    pub http_ports: Vec<String>,

    /// Listen addresses for TLS clients; only used when TLS is enabled.
    pub https_ports: Vec<String>,

    /// Listen address for plugs.
    pub plug_port: String,

    /// Seconds before an unanswered relayed request is evicted with a
    /// 504; 0 disables the sweep.
    pub request_ttl_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            plug_path: protocol::HUB_RESOURCE_PATH.to_string(),
            http_ports: vec![":8080".to_string()],
            https_ports: vec![":8443".to_string()],
            plug_port: ":8081".to_string(),
            request_ttl_secs: 60,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl HubConfig {
    /// Whether TLS listeners (HTTPS clients, WSS plugs) are enabled.
    pub fn secured(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Plug process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlugConfig {
    /// Hub URL to dial (ws:// or wss://).
    pub hub_url: String,

    /// Largest request content length this plug accepts; 0 or negative
    /// means unlimited.
    pub limit: i64,

    /// Client certificate (PEM) presented to the hub.
    pub cert_file: Option<String>,

    /// Client private key (PEM).
    pub key_file: Option<String>,

    /// Root CA bundle (PEM) used to verify the hub.
    pub ca_file: Option<String>,

    /// Seconds to wait before redialing after a disconnect.
    pub retry_wait_secs: u64,

    /// Advertised virtual hosts.
    pub hosts: Vec<String>,

    /// Origin URLs, index-aligned with `hosts`.
    pub origins: Vec<String>,

    /// Per-request timeout against the origin in seconds; 0 disables.
    pub origin_timeout_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for PlugConfig {
    fn default() -> Self {
        Self {
            hub_url: String::new(),
            limit: 0,
            cert_file: None,
            key_file: None,
            ca_file: None,
            retry_wait_secs: 60,
            hosts: Vec::new(),
            origins: Vec::new(),
            origin_timeout_secs: 0,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl PlugConfig {
    /// Lowercased virtual host -> parsed origin URL.
    pub fn host_map(&self) -> Result<HashMap<String, Url>, ConfigError> {
        let mut map = HashMap::new();
        for (host, origin) in self.hosts.iter().zip(&self.origins) {
            let host = host.trim().to_ascii_lowercase();
            if host.is_empty() {
                continue;
            }
            let url = Url::parse(origin.trim()).map_err(|source| ConfigError::Origin {
                origin: origin.clone(),
                source,
            })?;
            map.insert(host, url);
        }
        Ok(map)
    }

    /// Limit advertised on the upgrade; `None` when unlimited.
    pub fn advertised_limit(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit as u64)
    }
}

/// Observability settings shared by both processes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is not set.
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Scrape endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
