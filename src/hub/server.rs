//! Hub server wiring.
//!
//! # Responsibilities
//! - Start the switch task and hand its handle to the routers
//! - Bind client listeners (plain and, with TLS material, HTTPS)
//! - Bind the plug listener on its own router (WSS when secured)
//! - Treat the switch exiting as fatal

use axum::routing::{any, get};
use axum::Router;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::HubConfig;
use crate::hub::switch::Switch;
use crate::hub::{bridge, conn};
use crate::net::{self, ListenerError, TlsError};

/// Errors that end the hub process.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    /// A core switch queue closed; the invariant is gone.
    #[error("switch loop exited")]
    SwitchExited,

    /// A listener task ended unexpectedly.
    #[error("listener task ended")]
    ListenerExited,
}

/// The hub process: client listeners, the plug listener, and the switch.
pub struct HubServer {
    config: HubConfig,
}

impl HubServer {
    /// Create a hub server from its configuration.
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }

    /// Run until ctrl-c, a listener failure, or the switch exiting.
    pub async fn run(self) -> Result<(), ServeError> {
        let (switch, handle) = Switch::new(self.config.request_ttl_secs);
        let mut switch_task = tokio::spawn(switch.run());

        let client_router = Router::new()
            .route("/", any(bridge::handle_client))
            .route("/{*path}", any(bridge::handle_client))
            .with_state(handle.clone());
        let plug_router = Router::new()
            .route(&self.config.plug_path, get(conn::handle_plug))
            .with_state(handle.clone());

        let tls = match (&self.config.cert_file, &self.config.key_file) {
            (Some(cert), Some(key)) => Some(net::server_config(cert, key)?),
            _ => None,
        };

        let mut listeners = JoinSet::new();
        for port in &self.config.http_ports {
            let addr = net::parse_listen_addr(port)?;
            listeners.spawn(net::serve_plain(addr, client_router.clone()));
        }
        if let Some(tls) = &tls {
            for port in &self.config.https_ports {
                let addr = net::parse_listen_addr(port)?;
                listeners.spawn(net::serve_tls(addr, tls.clone(), client_router.clone()));
            }
        }

        let plug_addr = net::parse_listen_addr(&self.config.plug_port)?;
        match &tls {
            Some(tls) => {
                tracing::info!(
                    address = %plug_addr,
                    path = %self.config.plug_path,
                    "secure plug listener"
                );
                listeners.spawn(net::serve_tls(plug_addr, tls.clone(), plug_router));
            }
            None => {
                tracing::info!(
                    address = %plug_addr,
                    path = %self.config.plug_path,
                    "plug listener"
                );
                listeners.spawn(net::serve_plain(plug_addr, plug_router));
            }
        }

        tokio::select! {
            _ = &mut switch_task => {
                tracing::error!("switch loop exited");
                Err(ServeError::SwitchExited)
            }
            joined = listeners.join_next() => match joined {
                Some(Ok(Err(err))) => Err(err.into()),
                Some(Err(err)) => {
                    tracing::error!(error = %err, "listener task died");
                    Err(ServeError::ListenerExited)
                }
                _ => Err(ServeError::ListenerExited),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
        }
    }
}
