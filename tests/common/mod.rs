//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a mock origin that consumes each request and answers with the
/// given status line, extra header lines (each `\r\n`-terminated), and
/// body.
pub async fn start_mock_origin(
    addr: SocketAddr,
    status: &'static str,
    extra_headers: &'static str,
    body: &'static str,
) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        read_request(&mut socket).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\ncontent-length: {}\r\n{}connection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            extra_headers,
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Read one full request (headers plus a Content-Length body) off the
/// socket before answering.
async fn read_request(socket: &mut TcpStream) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut body_expected: Option<usize> = None;
    loop {
        if let Some(head_end) = find_head_end(&buf) {
            let expected = *body_expected.get_or_insert_with(|| content_length(&buf[..head_end]));
            if buf.len() >= head_end + expected {
                return;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &[u8]) -> usize {
    let head = String::from_utf8_lossy(head);
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Send one raw HTTP/1.1 request and return the full response as a
/// string. The request should carry `connection: close`.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = socket.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Like [`raw_request`], but treats a not-yet-listening socket as "no
/// response" instead of panicking, so callers can poll a listener that
/// is still coming up.
pub async fn try_raw_request(addr: SocketAddr, request: &str) -> Option<String> {
    let mut socket = match TcpStream::connect(addr).await {
        Ok(socket) => socket,
        Err(_) => return None,
    };
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = socket.read_to_end(&mut response).await;
    Some(String::from_utf8_lossy(&response).into_owned())
}

/// Poll `probe` every 100 ms until it returns true; panic after `timeout`.
pub async fn wait_for<F, Fut>(what: &str, timeout: Duration, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
