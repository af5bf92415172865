//! Origin worker: one relayed request against the configured origin.
//!
//! # Contract
//! - A relayed request without an id is denied with a synthetic 405
//! - The target is rewritten to the origin's scheme and authority, keeping
//!   the relayed path and query
//! - The hub reader is released as soon as the origin call resolves
//! - Origin failure becomes a synthetic 500 carrying the echoed id
//! - The worker id goes on the done channel last, whatever happened

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};
use tokio::sync::mpsc;
use url::Url;

use crate::plug::dispatcher::HubRequest;
use crate::protocol::{self, HEADER_REQUEST_ID};

/// Execute one hub request against `origin` and post the response frame
/// onto the writer channel.
pub async fn run_worker(
    id: u64,
    hub_request: HubRequest,
    origin: Url,
    client: reqwest::Client,
    rsp_tx: mpsc::Sender<Response<Bytes>>,
    done_tx: mpsc::Sender<u64>,
) {
    let HubRequest { request, done } = hub_request;

    let response = match protocol::request_id(&request).map(str::to_owned) {
        None => {
            tracing::warn!(worker = id, "request without id denied");
            done.release();
            protocol::synthetic_response(StatusCode::METHOD_NOT_ALLOWED, Some(&request))
        }
        Some(req_id) => {
            let (parts, body) = request.into_parts();
            let mut target = origin;
            target.set_path(parts.uri.path());
            target.set_query(parts.uri.query());

            tracing::debug!(worker = id, id = %req_id, method = %parts.method, target = %target, "origin request");
            let result = client
                .request(parts.method, target)
                .headers(parts.headers)
                .body(body)
                .send()
                .await;
            // The request frame is fully consumed; let the reader pull the
            // next one while the body streams in.
            done.release();

            match result {
                Ok(origin_rsp) => match read_response(origin_rsp, &req_id).await {
                    Ok(rsp) => rsp,
                    Err(err) => {
                        tracing::warn!(worker = id, id = %req_id, error = %err, "origin body read failed");
                        synthetic_with_id(StatusCode::INTERNAL_SERVER_ERROR, &req_id)
                    }
                },
                Err(err) => {
                    tracing::warn!(worker = id, id = %req_id, error = %err, "origin request failed");
                    synthetic_with_id(StatusCode::INTERNAL_SERVER_ERROR, &req_id)
                }
            }
        }
    };

    if rsp_tx.send(response).await.is_err() {
        tracing::debug!(worker = id, "writer channel closed before response");
    }
    let _ = done_tx.send(id).await;
}

/// Buffer the origin response and echo the request id onto it.
async fn read_response(
    origin_rsp: reqwest::Response,
    req_id: &str,
) -> Result<Response<Bytes>, reqwest::Error> {
    let status = origin_rsp.status();
    let headers = origin_rsp.headers().clone();
    let body = origin_rsp.bytes().await?;

    let mut rsp = Response::new(body);
    *rsp.status_mut() = status;
    *rsp.headers_mut() = headers;
    if let Ok(value) = HeaderValue::from_str(req_id) {
        rsp.headers_mut().append(HEADER_REQUEST_ID, value);
    }
    Ok(rsp)
}

fn synthetic_with_id(status: StatusCode, req_id: &str) -> Response<Bytes> {
    let mut rsp = Response::new(Bytes::new());
    *rsp.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(req_id) {
        rsp.headers_mut().insert(HEADER_REQUEST_ID, value);
    }
    rsp
}
