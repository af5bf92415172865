//! Plug connection endpoint, hub side.
//!
//! # Responsibilities
//! - Accept the WebSocket upgrade on the hub resource path
//! - Admit the connection to the registry and run its reader and writer
//! - Answer non-upgrade requests on the path with the registry dump
//!
//! # Data Flow
//! ```text
//! plug dials /_webx
//!     -> handle_plug (X-Proxy-For present? subprotocol webx)
//!     -> PlugIn command admits the connection
//!     -> writer: outbound queue -> one binary frame per request
//!     -> reader: one binary frame per response -> switch -> release
//!     -> reader exits -> PlugOut (queue closed, entries dropped)
//! ```

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use bytes::Bytes;
use http::Request;
use tokio::sync::mpsc;

use crate::hub::switch::{PlugResponse, SwitchHandle};
use crate::hub::PlugConn;
use crate::observability::metrics;
use crate::protocol::{
    self, ReleaseGuard, HEADER_MESSAGE_LIMIT, HEADER_PROXY_FOR, SUB_PROTOCOL_WEBX,
};

/// Handle a request on the hub resource path.
///
/// A GET carrying at least one `X-Proxy-For` header upgrades into a tunnel
/// (the method router rejects anything but GET with a 405). A request
/// without `X-Proxy-For` is a status query answered with the registry
/// dump. The origin is not checked: trust lives at the TLS layer.
pub async fn handle_plug(
    State(switch): State<SwitchHandle>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let hosts: Vec<String> = headers
        .get_all(HEADER_PROXY_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect();

    if hosts.is_empty() {
        return switch.status().await.into_response();
    }

    // Missing or unparseable limit means unbounded.
    let limit = headers
        .get(HEADER_MESSAGE_LIMIT)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    match ws {
        Ok(upgrade) => upgrade
            .protocols([SUB_PROTOCOL_WEBX])
            .on_upgrade(move |socket| plug_session(socket, switch, hosts, limit))
            .into_response(),
        Err(rejection) => {
            tracing::warn!(error = %rejection, "plug request without upgrade");
            (StatusCode::METHOD_NOT_ALLOWED, "upgrade required").into_response()
        }
    }
}

/// Drive one admitted plug connection until its transport dies.
async fn plug_session(socket: WebSocket, switch: SwitchHandle, hosts: Vec<String>, limit: u64) {
    let (conn, outbound) = PlugConn::new(hosts, limit);
    let added = switch.register(conn.clone()).await;
    if added == 0 {
        // No hosts or already admitted; dropping the socket closes it.
        tracing::warn!("plug admission rejected");
        return;
    }
    let total = switch.hosts_count(Vec::new()).await;
    tracing::info!(
        id = conn.id(),
        hosts = added,
        limit = conn.limit(),
        total_hosts = total,
        "plug connected"
    );
    metrics::record_plugs(1);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(plug_writer(sink, outbound));
    plug_reader(stream, &switch).await;

    // Reader is done: close the outbound queue (stops the writer) and drop
    // the registry entries.
    let removed = switch.unregister(conn.clone()).await;
    tracing::info!(id = conn.id(), removed, "plug disconnected");
    metrics::record_plugs(-1);
    let _ = writer.await;
}

/// Read response frames and hand them to the switch, strictly one at a
/// time: the loop waits for each response's release signal before reading
/// the next frame, so a slow bridge throttles the plug transport.
async fn plug_reader(mut stream: SplitStream<WebSocket>, switch: &SwitchHandle) {
    loop {
        let data = match stream.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {
                tracing::warn!("non-binary frame from plug skipped");
                continue;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "plug read failed");
                break;
            }
        };
        let response = match protocol::decode_response(&data) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "bad response frame");
                break;
            }
        };
        let (done, released) = ReleaseGuard::pair();
        if switch
            .respond(PlugResponse::new(response, done))
            .await
            .is_err()
        {
            break;
        }
        let _ = released.await;
    }
}

/// Drain the outbound queue onto the transport, one binary frame per
/// request. The queue closing (unplug) is the clean exit: a Close frame is
/// sent and the transport dropped. The writer is the sole closer of the
/// transport on clean paths.
async fn plug_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Request<Bytes>>,
) {
    while let Some(request) = outbound.recv().await {
        let id = protocol::request_id(&request).unwrap_or_default().to_owned();
        let frame = protocol::encode_request(&request);
        if let Err(err) = sink.send(Message::Binary(frame)).await {
            tracing::warn!(error = %err, "plug write failed");
            return;
        }
        tracing::debug!(id = %id, "request frame sent");
    }
    let _ = sink.send(Message::Close(None)).await;
}
