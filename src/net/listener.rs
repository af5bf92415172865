//! Listener setup: plain and TLS serving of an axum router.
//!
//! # Responsibilities
//! - Parse configured listen addresses (a bare `:port` binds all
//!   interfaces)
//! - Serve plain listeners through `axum::serve`
//! - Serve TLS listeners with a per-connection handshake and an
//!   upgrade-capable connection driver

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured listen address is not parseable.
    #[error("invalid listen address '{0}'")]
    Addr(String),

    /// Failed to bind to an address.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// The accept loop failed.
    #[error("listener failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Parse a listen address; a bare `:port` binds all interfaces.
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr, ListenerError> {
    let candidate = match s.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => s.to_string(),
    };
    candidate
        .parse()
        .map_err(|_| ListenerError::Addr(s.to_string()))
}

/// Serve `router` over plain TCP.
pub async fn serve_plain(addr: SocketAddr, router: Router) -> Result<(), ListenerError> {
    let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
    tracing::info!(address = %addr, "listener bound");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(ListenerError::Serve)
}

/// Serve `router` over TLS, one handshake and connection driver per
/// accepted socket. Upgrades (WebSocket) pass through.
pub async fn serve_tls(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    router: Router,
) -> Result<(), ListenerError> {
    let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
    let acceptor = TlsAcceptor::from(tls);
    tracing::info!(address = %addr, "TLS listener bound");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::debug!(peer = %peer, error = %err, "TLS handshake failed");
                    return;
                }
            };
            let service =
                hyper::service::service_fn(move |mut req: http::Request<hyper::body::Incoming>| {
                    req.extensions_mut().insert(ConnectInfo(peer));
                    router.clone().oneshot(req)
                });
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                .await
            {
                tracing::debug!(peer = %peer, error = %err, "connection closed with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        let addr = parse_listen_addr(":8080").unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn full_address_passes_through() {
        let addr = parse_listen_addr("127.0.0.1:9000").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn nonsense_is_rejected() {
        assert!(parse_listen_addr("not an address").is_err());
        assert!(parse_listen_addr(":").is_err());
    }
}
