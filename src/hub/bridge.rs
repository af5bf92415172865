//! Client bridge: one inbound HTTP request in, one tunneled response out.
//!
//! # Responsibilities
//! - Buffer the inbound request body (frames carry complete messages)
//! - Post the request to the switch and wait on a single-shot reply
//! - Strip hop-by-hop headers and copy the plug response to the client
//!
//! Trailers produced by origins are deliberately dropped.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::Request;
use http_body_util::BodyExt;
use tokio::sync::oneshot;

use crate::hub::switch::{ClientRequest, SwitchHandle};
use crate::protocol;

/// Serve one inbound client request by relaying it through the switch.
pub async fn handle_client(
    State(switch): State<SwitchHandle>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read client body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };
    let request = Request::from_parts(parts, body);

    let (reply_tx, reply_rx) = oneshot::channel();
    let job = ClientRequest {
        request,
        remote_addr,
        reply: reply_tx,
    };
    if switch.submit(job).await.is_err() {
        return gateway_error();
    }

    match reply_rx.await {
        Ok(plug_response) => {
            // Taking the response releases the plug reader; the body is
            // already fully out of the transport.
            let mut response = plug_response.into_inner();
            protocol::strip_hop_headers(response.headers_mut());
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::from(body))
        }
        // Closed without a value: switch shutdown or the plug died.
        Err(_) => gateway_error(),
    }
}

fn gateway_error() -> Response {
    (StatusCode::BAD_GATEWAY, "upstream tunnel failed").into_response()
}
