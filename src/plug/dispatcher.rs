//! Plug dispatcher: pull hub requests, fan out origin workers, multiplex
//! their responses back onto one writer.
//!
//! # Data Flow
//! ```text
//! hub frame -> hub_reader (decode, release-gated, queue of 1)
//!     -> dispatch loop (host map lookup)
//!         unknown host -> synthetic 404 straight to the writer
//!         known host   -> origin worker (monotonic id, pending counter)
//!     -> workers -> response channel (5) -> hub_writer -> hub frame
//! ```
//!
//! The reader closing its channel stops the loop; outstanding workers are
//! drained before the writer channel closes, then the session redials.

use std::collections::HashMap;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{ConfigError, PlugConfig};
use crate::plug::dialer::{self, HubStream};
use crate::plug::origin;
use crate::protocol::{self, ReleaseGuard};
use tokio_tungstenite::tungstenite::Message;

/// Requests in flight from the hub reader to the dispatch loop.
const HUB_REQ_QUEUE_LEN: usize = 1;
/// Responses in flight from workers to the hub writer.
const HUB_RSP_QUEUE_LEN: usize = 5;

/// A request relayed by the hub, paired with the reader's release signal.
#[derive(Debug)]
pub struct HubRequest {
    pub request: Request<Bytes>,
    pub done: ReleaseGuard,
}

/// Errors that stop the plug before its dial loop starts.
#[derive(Debug, Error)]
pub enum PlugError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The origin HTTP client could not be built.
    #[error("origin client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Run the plug process: dial the hub, proxy until the tunnel dies, wait
/// the configured delay, redial. Never returns under normal operation.
pub async fn run(config: PlugConfig) -> Result<(), PlugError> {
    let hosts = config.host_map()?;
    tracing::info!(hosts = hosts.len(), "origin map ready");

    let mut builder = reqwest::Client::builder();
    if config.origin_timeout_secs > 0 {
        builder = builder.timeout(std::time::Duration::from_secs(config.origin_timeout_secs));
    }
    let client = builder.build()?;
    let retry = std::time::Duration::from_secs(config.retry_wait_secs.max(1));

    loop {
        match dialer::dial_hub(&config).await {
            Ok(stream) => run_session(stream, &hosts, &client).await,
            Err(err) => tracing::warn!(error = %err, "dial failed"),
        }
        tracing::info!(seconds = retry.as_secs(), "waiting before redial");
        tokio::time::sleep(retry).await;
    }
}

/// Proxy one tunnel session until the hub reader closes its channel.
async fn run_session(stream: HubStream, hosts: &HashMap<String, Url>, client: &reqwest::Client) {
    let (sink, stream) = stream.split();
    let (req_tx, req_rx) = mpsc::channel(HUB_REQ_QUEUE_LEN);
    let (rsp_tx, rsp_rx) = mpsc::channel(HUB_RSP_QUEUE_LEN);

    let reader = tokio::spawn(hub_reader(stream, req_tx));
    let writer = tokio::spawn(hub_writer(sink, rsp_rx));

    dispatch(req_rx, rsp_tx, hosts, client).await;

    let _ = reader.await;
    let _ = writer.await;
    tracing::info!("tunnel session ended");
}

/// The dispatch loop: spawn a worker per routable request, answer
/// unroutable ones directly, and drain workers once the reader is gone.
async fn dispatch(
    mut req_rx: mpsc::Receiver<HubRequest>,
    rsp_tx: mpsc::Sender<Response<Bytes>>,
    hosts: &HashMap<String, Url>,
    client: &reqwest::Client,
) {
    let (done_tx, mut done_rx) = mpsc::channel(HUB_RSP_QUEUE_LEN);
    let mut worker_seq: u64 = 0;
    let mut pending: usize = 0;

    loop {
        tokio::select! {
            maybe = req_rx.recv() => match maybe {
                Some(hub_request) => {
                    let host = protocol::host_of(&hub_request.request)
                        .map(|h| h.to_ascii_lowercase());
                    match host.as_deref().and_then(|h| hosts.get(h)) {
                        Some(origin_url) => {
                            worker_seq += 1;
                            pending += 1;
                            tokio::spawn(origin::run_worker(
                                worker_seq,
                                hub_request,
                                origin_url.clone(),
                                client.clone(),
                                rsp_tx.clone(),
                                done_tx.clone(),
                            ));
                        }
                        None => {
                            tracing::warn!(
                                host = host.as_deref().unwrap_or(""),
                                "no origin for host"
                            );
                            let denied = protocol::synthetic_response(
                                StatusCode::NOT_FOUND,
                                Some(&hub_request.request),
                            );
                            if rsp_tx.send(denied).await.is_err() {
                                break;
                            }
                            // hub_request drops here, releasing the reader
                        }
                    }
                }
                // Reader gone: stop accepting work.
                None => break,
            },
            Some(id) = done_rx.recv() => {
                pending = pending.saturating_sub(1);
                tracing::debug!(worker = id, pending, "worker done");
            }
        }
    }

    // Drain outstanding workers before the writer channel closes.
    while pending > 0 {
        if done_rx.recv().await.is_none() {
            break;
        }
        pending -= 1;
        tracing::debug!(pending, "worker drained");
    }
    // rsp_tx drops here; the writer sends a close frame and exits.
}

/// Read request frames from the hub, strictly one in flight: the loop
/// waits for each request's release signal before the next read, so a
/// request body is fully consumed before the next frame arrives.
async fn hub_reader(mut stream: SplitStream<HubStream>, req_tx: mpsc::Sender<HubRequest>) {
    loop {
        let data = match stream.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("hub closed the tunnel");
                break;
            }
            Some(Ok(_)) => {
                tracing::warn!("non-binary frame from hub skipped");
                continue;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "hub read failed");
                break;
            }
        };
        let request = match protocol::decode_request(&data) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "bad request frame skipped");
                continue;
            }
        };
        let (done, released) = ReleaseGuard::pair();
        if req_tx.send(HubRequest { request, done }).await.is_err() {
            break;
        }
        let _ = released.await;
    }
    // req_tx drops here; the dispatch loop sees a closed channel.
}

/// Forward responses to the hub, one binary frame each. A write error is
/// logged and the channel kept draining until the dispatcher closes it;
/// the transport is closed on exit.
async fn hub_writer(
    mut sink: SplitSink<HubStream, Message>,
    mut rsp_rx: mpsc::Receiver<Response<Bytes>>,
) {
    while let Some(response) = rsp_rx.recv().await {
        let id = protocol::response_id(&response).unwrap_or_default().to_owned();
        let frame = protocol::encode_response(&response);
        if let Err(err) = sink.send(Message::Binary(frame)).await {
            tracing::warn!(error = %err, "hub write failed");
            continue;
        }
        tracing::debug!(id = %id, "response frame sent");
    }
    let _ = sink.close().await;
}
