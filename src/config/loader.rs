//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{HubConfig, PlugConfig};
use crate::config::validation::{validate_hub, validate_plug, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the expected schema.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantic validation failed.
    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),

    /// An origin URL in the host map is unparseable.
    #[error("invalid origin url '{origin}': {source}")]
    Origin {
        origin: String,
        source: url::ParseError,
    },
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate a hub configuration from a TOML file.
pub fn load_hub_config(path: &Path) -> Result<HubConfig, ConfigError> {
    let config: HubConfig = toml::from_str(&read(path)?)?;
    validate_hub(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate a plug configuration from a TOML file.
pub fn load_plug_config(path: &Path) -> Result<PlugConfig, ConfigError> {
    let config: PlugConfig = toml::from_str(&read(path)?)?;
    validate_plug(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
