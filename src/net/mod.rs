//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listen address string ("host:port" or ":port")
//!     -> listener.rs (parse, bind, serve plain or TLS)
//!     -> tls.rs (PEM material -> rustls server/client configs)
//!     -> Hand off to the HTTP layer (axum routers)
//! ```

pub mod listener;
pub mod tls;

pub use listener::{parse_listen_addr, serve_plain, serve_tls, ListenerError};
pub use tls::{client_config, server_config, TlsError};
