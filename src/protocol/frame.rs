//! HTTP/1 frame codec for the tunnel channel.
//!
//! Each WebSocket binary message carries exactly one complete HTTP/1
//! message: a request on the hub->plug leg, a response on the way back.
//! The body is written inside the same frame, so the frame boundary also
//! delimits the body; a declared Content-Length is informative only.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use thiserror::Error;

/// Header slots available when parsing a frame. httparse rejects messages
/// with more.
const MAX_HEADERS: usize = 64;

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not a syntactically valid HTTP/1 message.
    #[error("malformed HTTP message: {0}")]
    Parse(#[from] httparse::Error),

    /// The frame ended before the header section was complete.
    #[error("frame ended before the message was complete")]
    Incomplete,

    /// The request target could not be parsed as a URI.
    #[error("invalid request target: {0}")]
    Target(#[from] http::uri::InvalidUri),

    /// The response carried an out-of-range status code.
    #[error("invalid status code: {0}")]
    Status(#[from] http::status::InvalidStatusCode),

    /// The request carried an unknown method token.
    #[error("invalid method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    /// A header name or value is not representable.
    #[error("invalid header in message")]
    Header,

    /// Assembling the typed message failed.
    #[error("invalid message: {0}")]
    Http(#[from] http::Error),
}

/// Serialize a request into a single frame, origin-form target.
///
/// The virtual host travels in the Host header; one is synthesized from the
/// URI authority when the request has none.
pub fn encode_request(req: &Request<Bytes>) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + req.body().len());
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    buf.put_slice(req.method().as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    if !req.headers().contains_key(http::header::HOST) {
        if let Some(authority) = req.uri().authority() {
            put_header_line(&mut buf, "host", authority.as_str().as_bytes());
        }
    }
    put_headers(&mut buf, req.headers(), req.body().len());
    buf.put_slice(b"\r\n");
    buf.put_slice(req.body());
    buf.freeze()
}

/// Serialize a response into a single frame.
pub fn encode_response(rsp: &Response<Bytes>) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + rsp.body().len());
    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(rsp.status().as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(
        rsp.status()
            .canonical_reason()
            .unwrap_or("Unknown")
            .as_bytes(),
    );
    buf.put_slice(b"\r\n");
    put_headers(&mut buf, rsp.headers(), rsp.body().len());
    buf.put_slice(b"\r\n");
    buf.put_slice(rsp.body());
    buf.freeze()
}

/// Parse one frame as an HTTP/1 request. The body is everything past the
/// header section.
pub fn decode_request(frame: &[u8]) -> Result<Request<Bytes>, FrameError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut slots);
    let body_start = match parsed.parse(frame)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(FrameError::Incomplete),
    };

    let method = Method::from_bytes(parsed.method.unwrap_or("GET").as_bytes())?;
    let target: Uri = parsed.path.unwrap_or("/").parse()?;
    let headers = collect_headers(parsed.headers)?;

    let mut req = Request::builder()
        .method(method)
        .uri(target)
        .version(Version::HTTP_11)
        .body(Bytes::copy_from_slice(&frame[body_start..]))?;
    *req.headers_mut() = headers;
    Ok(req)
}

/// Parse one frame as an HTTP/1 response.
pub fn decode_response(frame: &[u8]) -> Result<Response<Bytes>, FrameError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut slots);
    let body_start = match parsed.parse(frame)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(FrameError::Incomplete),
    };

    let status = StatusCode::from_u16(parsed.code.unwrap_or(200))?;
    let headers = collect_headers(parsed.headers)?;

    let mut rsp = Response::builder()
        .status(status)
        .version(Version::HTTP_11)
        .body(Bytes::copy_from_slice(&frame[body_start..]))?;
    *rsp.headers_mut() = headers;
    Ok(rsp)
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> Result<HeaderMap, FrameError> {
    let mut headers = HeaderMap::with_capacity(parsed.len());
    for h in parsed {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| FrameError::Header)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| FrameError::Header)?;
        headers.append(name, value);
    }
    Ok(headers)
}

// The frame owns body framing: Content-Length is rewritten to match the
// bytes actually present and chunked encoding never crosses the tunnel.
fn put_headers(buf: &mut BytesMut, headers: &HeaderMap, body_len: usize) {
    let had_length = headers.contains_key(http::header::CONTENT_LENGTH);
    for (name, value) in headers {
        if name == http::header::CONTENT_LENGTH || name == http::header::TRANSFER_ENCODING {
            continue;
        }
        put_header_line(buf, name.as_str(), value.as_bytes());
    }
    if body_len > 0 || had_length {
        put_header_line(buf, "content-length", body_len.to_string().as_bytes());
    }
}

fn put_header_line(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}
