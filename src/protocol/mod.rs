//! Tunnel protocol constants and shared message helpers.
//!
//! # Responsibilities
//! - Define the header names and subprotocol token of the hub<->plug channel
//! - Build synthetic error responses (status + echoed request id, no body)
//! - Strip hop-by-hop headers before a response reaches the inbound client
//! - Provide the one-shot release signal used for frame backpressure

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use tokio::sync::oneshot;

pub mod frame;

pub use frame::{decode_request, decode_response, encode_request, encode_response, FrameError};

/// Virtual hosts a plug claims on upgrade; repeated, one per host.
pub const HEADER_PROXY_FOR: &str = "x-proxy-for";

/// Optional per-plug request size limit, unsigned decimal. Absent or
/// unparseable means unbounded.
pub const HEADER_MESSAGE_LIMIT: &str = "x-webx-message-limit";

/// Monotonic request id assigned by the hub; the plug echoes it unchanged
/// on the response.
pub const HEADER_REQUEST_ID: &str = "x-webx-request-id";

/// Appended by the hub with the inbound client's remote address.
pub const HEADER_FORWARD_FOR: &str = "x-forwarded-for";

/// WebSocket subprotocol negotiated on the hub<->plug channel.
pub const SUB_PROTOCOL_WEBX: &str = "webx";

/// Default hub resource path for plug upgrades.
pub const HUB_RESOURCE_PATH: &str = "/_webx";

/// Hop-by-hop headers (RFC 2616 section 13.5.1), stripped from plug
/// responses before they are relayed to the inbound client.
pub const HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove all hop-by-hop headers in place.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

/// Request id carried by a request, if any.
pub fn request_id<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
}

/// Request id echoed on a response, if any.
pub fn response_id<B>(rsp: &Response<B>) -> Option<&str> {
    rsp.headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
}

/// Target host of a request: the Host header when present, the URI
/// authority otherwise (HTTP/2 inbound requests carry no Host header).
pub fn host_of<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// Declared Content-Length of a request; 0 when absent or unparseable.
pub fn content_length<B>(req: &Request<B>) -> u64 {
    req.headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Build a bodyless response with the given status, echoing the request id
/// of `req` when it carries one.
pub fn synthetic_response<B>(status: StatusCode, req: Option<&Request<B>>) -> Response<Bytes> {
    let mut rsp = Response::new(Bytes::new());
    *rsp.status_mut() = status;
    if let Some(id) = req.and_then(request_id) {
        if let Ok(value) = http::HeaderValue::from_str(id) {
            rsp.headers_mut().insert(HEADER_REQUEST_ID, value);
        }
    }
    rsp
}

/// One-shot backpressure signal paired with a frame.
///
/// The reader that produced the frame waits on the receiving half before
/// pulling the next message off the transport. The signal fires on explicit
/// [`release`](ReleaseGuard::release) or when the guard is dropped, so an
/// abandoned consumer can never wedge the reader.
#[derive(Debug)]
pub struct ReleaseGuard(Option<oneshot::Sender<()>>);

impl ReleaseGuard {
    /// Create a guard and the receiver the producer waits on.
    pub fn pair() -> (ReleaseGuard, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (ReleaseGuard(Some(tx)), rx)
    }

    /// A guard with no signal attached, for synthetic messages that never
    /// touched a transport.
    pub fn detached() -> ReleaseGuard {
        ReleaseGuard(None)
    }

    /// Let the producer continue.
    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_id(id: &str) -> Request<Bytes> {
        Request::builder()
            .uri("/x")
            .header(HEADER_REQUEST_ID, id)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn synthetic_echoes_request_id() {
        let req = request_with_id("42");
        let rsp = synthetic_response(StatusCode::NOT_FOUND, Some(&req));
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
        assert_eq!(response_id(&rsp), Some("42"));
        assert!(rsp.body().is_empty());
    }

    #[test]
    fn synthetic_without_id_has_no_header() {
        let req: Request<Bytes> = Request::builder().uri("/").body(Bytes::new()).unwrap();
        let rsp = synthetic_response(StatusCode::PAYLOAD_TOO_LARGE, Some(&req));
        assert_eq!(response_id(&rsp), None);
    }

    #[test]
    fn hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());
        strip_hop_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let req: Request<Bytes> = Request::builder().uri("/").body(Bytes::new()).unwrap();
        assert_eq!(content_length(&req), 0);

        let req: Request<Bytes> = Request::builder()
            .uri("/")
            .header("content-length", "oops")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(content_length(&req), 0);

        let req: Request<Bytes> = Request::builder()
            .uri("/")
            .header("content-length", "512")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(content_length(&req), 512);
    }

    #[tokio::test]
    async fn release_guard_fires_on_release_and_on_drop() {
        let (guard, rx) = ReleaseGuard::pair();
        guard.release();
        assert!(rx.await.is_ok());

        // An abandoned guard releases the producer too.
        let (guard, rx) = ReleaseGuard::pair();
        drop(guard);
        assert!(rx.await.is_ok());
    }
}
