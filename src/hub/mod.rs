//! Hub-side subsystem: the public end of the tunnel.
//!
//! # Data Flow
//! ```text
//! Inbound client request
//!     -> bridge.rs (buffer body, post to the switch, await reply)
//!     -> switch.rs (assign id, pick a plug via registry.rs, pend)
//!     -> conn.rs writer (one binary frame per request)
//!     -> ... plug process ...
//!     -> conn.rs reader (one frame per response, release-gated)
//!     -> switch.rs (match id, deliver to the waiting bridge)
//!     -> bridge.rs (strip hop headers, answer the client)
//! ```

pub mod bridge;
pub mod conn;
pub mod registry;
pub mod server;
pub mod switch;

pub use registry::{PlugConn, PlugEntry, PlugRegistry};
pub use server::{HubServer, ServeError};
pub use switch::{ClientRequest, PlugResponse, Switch, SwitchCommand, SwitchHandle};
