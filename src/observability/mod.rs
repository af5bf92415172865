//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     -> logging.rs (structured tracing events)
//!     -> metrics.rs (counters, gauges)
//!
//! Consumers:
//!     -> Log aggregation (stdout)
//!     -> Metrics endpoint (Prometheus scrape, config-gated)
//! ```
//!
//! # Design Decisions
//! - Structured logging via tracing; RUST_LOG wins over the config level
//! - Metrics are cheap (atomic increments) and safe to call with no
//!   recorder installed

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
