//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! CLI flags (and an optional TOML file)
//!     -> loader.rs (parse & deserialize the file)
//!     -> flag overrides applied by the binary
//!     -> validation.rs (semantic checks)
//!     -> HubConfig / PlugConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_hub_config, load_plug_config, ConfigError};
pub use schema::{HubConfig, ObservabilityConfig, PlugConfig};
pub use validation::{validate_hub, validate_plug, ValidationError};
