//! webx: a reverse HTTP tunnel.
//!
//! A publicly reachable **hub** accepts HTTP(S) requests from end users
//! and relays them, over persistent full-duplex WebSocket channels, to
//! **plugs** that dial out from an intranet and proxy to origin servers.
//! Private services publish through one inbound endpoint at the hub with
//! no port exposure on the intranet side.
//!
//! # Architecture Overview
//!
//! ```text
//!                HUB (public)                         PLUG (intranet)
//!   client ──▶ ┌──────────┐   ┌──────────┐  frames  ┌────────────┐
//!              │  bridge  │──▶│  switch  │═════════▶│ dispatcher │──▶ origin
//!              └──────────┘   │ registry │◀═════════│  workers   │◀── server
//!   client ◀───────────────── │ pending  │  frames  └────────────┘
//!                             └──────────┘
//! ```
//!
//! Each WebSocket binary frame carries one complete HTTP/1 message; the
//! hub's switch task serializes routing, the registry groups plugs per
//! host into size bands picked round robin, and release signals keep at
//! most one response in flight per plug connection.

// Core subsystems
pub mod config;
pub mod hub;
pub mod plug;
pub mod protocol;

// Cross-cutting concerns
pub mod net;
pub mod observability;

pub use config::{HubConfig, PlugConfig};
pub use hub::HubServer;
