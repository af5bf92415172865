//! Configuration validation logic.

use url::Url;

use crate::config::schema::{HubConfig, PlugConfig};
use crate::net;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

/// Validate a HubConfig for semantic correctness.
pub fn validate_hub(config: &HubConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.plug_path.starts_with('/') {
        errors.push(ValidationError(format!(
            "plug_path '{}' must start with '/'",
            config.plug_path
        )));
    }

    // Cert and key only work as a pair.
    if config.cert_file.is_some() != config.key_file.is_some() {
        errors.push(ValidationError(
            "cert_file and key_file must be set together".to_string(),
        ));
    }

    for port in config
        .http_ports
        .iter()
        .chain(&config.https_ports)
        .chain(std::iter::once(&config.plug_port))
    {
        if net::parse_listen_addr(port).is_err() {
            errors.push(ValidationError(format!("invalid listen address '{port}'")));
        }
    }

    if config.http_ports.is_empty() && !(config.secured() && !config.https_ports.is_empty()) {
        tracing::warn!("no client listeners configured");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a PlugConfig for semantic correctness.
pub fn validate_plug(config: &PlugConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.hub_url.parse::<http::Uri>() {
        Ok(uri) => match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            other => errors.push(ValidationError(format!(
                "hub_url scheme must be ws or wss, got '{}'",
                other.unwrap_or("")
            ))),
        },
        Err(_) => errors.push(ValidationError(format!(
            "hub_url '{}' is not a valid URL",
            config.hub_url
        ))),
    }

    if config.hosts.is_empty() {
        errors.push(ValidationError("at least one virtual host required".to_string()));
    }
    if config.hosts.len() != config.origins.len() {
        errors.push(ValidationError(format!(
            "{} hosts but {} origins; the lists must be index-aligned",
            config.hosts.len(),
            config.origins.len()
        )));
    }

    for origin in &config.origins {
        match Url::parse(origin.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError(format!(
                "origin '{}' must be http or https, got '{}'",
                origin,
                url.scheme()
            ))),
            Err(_) => errors.push(ValidationError(format!(
                "origin '{origin}' is not a valid URL"
            ))),
        }
    }

    if config.cert_file.is_some() != config.key_file.is_some() {
        errors.push(ValidationError(
            "cert_file and key_file must be set together".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hub_config_is_valid() {
        assert!(validate_hub(&HubConfig::default()).is_ok());
    }

    #[test]
    fn hub_rejects_lone_cert() {
        let config = HubConfig {
            cert_file: Some("hub.pem".into()),
            ..Default::default()
        };
        let errs = validate_hub(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("set together"));
    }

    #[test]
    fn hub_rejects_bad_path_and_port() {
        let config = HubConfig {
            plug_path: "webx".into(),
            plug_port: "nope".into(),
            ..Default::default()
        };
        let errs = validate_hub(&config).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn valid_plug_config_passes() {
        let config = PlugConfig {
            hub_url: "wss://hub.example:8443/_webx".into(),
            hosts: vec!["a.example".into()],
            origins: vec!["http://127.0.0.1:3000".into()],
            ..Default::default()
        };
        assert!(validate_plug(&config).is_ok());
    }

    #[test]
    fn plug_rejects_scheme_and_misalignment() {
        let config = PlugConfig {
            hub_url: "http://hub.example/_webx".into(),
            hosts: vec!["a.example".into(), "b.example".into()],
            origins: vec!["http://127.0.0.1:3000".into()],
            ..Default::default()
        };
        let errs = validate_plug(&config).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn plug_rejects_empty_hosts() {
        let config = PlugConfig {
            hub_url: "ws://hub.example/_webx".into(),
            ..Default::default()
        };
        let errs = validate_plug(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("virtual host")));
    }
}
