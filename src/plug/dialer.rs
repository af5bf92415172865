//! Hub dialer: WebSocket connect with tunnel headers and TLS material.

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::config::PlugConfig;
use crate::net::{self, TlsError};
use crate::protocol::{HEADER_MESSAGE_LIMIT, HEADER_PROXY_FOR, SUB_PROTOCOL_WEBX};

/// The tunnel transport on the plug side.
pub type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors produced while dialing the hub.
#[derive(Debug, Error)]
pub enum DialError {
    /// The configured hub URL is not a valid URI.
    #[error("invalid hub url: {0}")]
    Url(#[from] http::uri::InvalidUri),

    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The WebSocket handshake failed.
    #[error("hub handshake failed: {0}")]
    Connect(#[from] tungstenite::Error),
}

/// Dial the hub, claiming the configured virtual hosts and advertising the
/// message limit when one is set.
pub async fn dial_hub(config: &PlugConfig) -> Result<HubStream, DialError> {
    let uri: http::Uri = config.hub_url.parse()?;
    let mut request = ClientRequestBuilder::new(uri).with_sub_protocol(SUB_PROTOCOL_WEBX);
    for host in &config.hosts {
        request = request.with_header(HEADER_PROXY_FOR, host.trim());
    }
    if let Some(limit) = config.advertised_limit() {
        request = request.with_header(HEADER_MESSAGE_LIMIT, limit.to_string());
    }

    tracing::info!(hub = %config.hub_url, limit = config.limit, "dialing hub");
    let connector = tls_connector(config)?;
    let (stream, response) = connect_async_tls_with_config(request, None, false, connector).await?;
    tracing::info!(status = %response.status(), "connected to hub");
    Ok(stream)
}

// Custom material only; with neither a CA bundle nor a client certificate
// the library default applies.
fn tls_connector(config: &PlugConfig) -> Result<Option<Connector>, TlsError> {
    if config.ca_file.is_none() && config.cert_file.is_none() {
        return Ok(None);
    }
    let client = net::client_config(
        config.ca_file.as_deref(),
        config.cert_file.as_deref(),
        config.key_file.as_deref(),
    )?;
    Ok(Some(Connector::Rustls(client)))
}
