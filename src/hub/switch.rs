//! Hub switching loop.
//!
//! # Responsibilities
//! - Serialize all registry mutations, request routing, and response
//!   dispatch through one task
//! - Assign monotonic request ids and keep the pending-request table
//! - Answer registry commands (host count, plug in/out, dump)
//! - Sweep pending requests that outlive their TTL
//!
//! # Design Decisions
//! - The switch task is the sole owner of registry, pending table, and id
//!   counter; everything else talks to it through bounded channels
//! - A closed core queue is an invariant violation: the loop logs and
//!   exits, and the process follows
//! - Command replies are strings (decimal counts, JSON dumps), one reply
//!   per sink

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::hub::registry::{PlugConn, PlugRegistry};
use crate::observability::metrics;
use crate::protocol::{self, ReleaseGuard, HEADER_FORWARD_FOR, HEADER_REQUEST_ID};

/// Client request queue length.
const REQ_QUEUE_LEN: usize = 10;
/// Plug response queue length.
const RSP_QUEUE_LEN: usize = 10;
/// Command queue length.
const CMD_QUEUE_LEN: usize = 1;

/// A client request en route to a plug, with the bridge's reply sink.
#[derive(Debug)]
pub struct ClientRequest {
    pub request: Request<Bytes>,
    pub remote_addr: SocketAddr,
    pub reply: oneshot::Sender<PlugResponse>,
}

/// A response from a plug, or a synthetic one, paired with the release
/// signal of the reader that produced it.
#[derive(Debug)]
pub struct PlugResponse {
    pub response: Response<Bytes>,
    pub done: ReleaseGuard,
}

impl PlugResponse {
    /// Wrap a decoded response frame and its release signal.
    pub fn new(response: Response<Bytes>, done: ReleaseGuard) -> Self {
        Self { response, done }
    }

    /// A synthetic response that never touched a transport.
    pub fn synthetic<B>(status: StatusCode, req: Option<&Request<B>>) -> Self {
        Self {
            response: protocol::synthetic_response(status, req),
            done: ReleaseGuard::detached(),
        }
    }

    /// Take the response; the plug reader is released now that the frame
    /// is fully consumed.
    pub fn into_inner(self) -> Response<Bytes> {
        self.response
    }
}

/// Registry commands serialized through the switch.
#[derive(Debug)]
pub enum SwitchCommand {
    /// Count how many of `hosts` are registered; all hosts when empty.
    HostCount {
        hosts: Vec<String>,
        reply: oneshot::Sender<String>,
    },
    /// Admit a plug for all its hosts.
    PlugIn {
        plug: Arc<PlugConn>,
        reply: oneshot::Sender<String>,
    },
    /// Close the plug's outbound queue, then drop its entries.
    PlugOut {
        plug: Arc<PlugConn>,
        reply: oneshot::Sender<String>,
    },
    /// JSON snapshot of the registry.
    Dump { reply: oneshot::Sender<String> },
}

/// The switch loop is gone and its queues are closed.
#[derive(Debug, Error)]
#[error("switch is not running")]
pub struct SwitchClosed;

/// Cloneable handle used by bridges and plug endpoints to reach the
/// switch task.
#[derive(Debug, Clone)]
pub struct SwitchHandle {
    req_tx: mpsc::Sender<ClientRequest>,
    rsp_tx: mpsc::Sender<PlugResponse>,
    cmd_tx: mpsc::Sender<SwitchCommand>,
}

impl SwitchHandle {
    /// Post a client request; blocks while the request queue is full.
    pub async fn submit(&self, request: ClientRequest) -> Result<(), SwitchClosed> {
        self.req_tx.send(request).await.map_err(|_| SwitchClosed)
    }

    /// Post a plug response; blocks while the response queue is full.
    pub async fn respond(&self, response: PlugResponse) -> Result<(), SwitchClosed> {
        self.rsp_tx.send(response).await.map_err(|_| SwitchClosed)
    }

    /// Admit a plug. Returns the number of host entries added.
    pub async fn register(&self, plug: Arc<PlugConn>) -> usize {
        let reply = self
            .command(|reply| SwitchCommand::PlugIn { plug, reply })
            .await;
        reply.parse().unwrap_or(0)
    }

    /// Drop a plug. Returns the number of host entries removed.
    pub async fn unregister(&self, plug: Arc<PlugConn>) -> usize {
        let reply = self
            .command(|reply| SwitchCommand::PlugOut { plug, reply })
            .await;
        reply.parse().unwrap_or(0)
    }

    /// How many of `hosts` are registered; total host count when empty.
    pub async fn hosts_count(&self, hosts: Vec<String>) -> usize {
        let reply = self
            .command(|reply| SwitchCommand::HostCount { hosts, reply })
            .await;
        reply.parse().unwrap_or(0)
    }

    /// JSON snapshot of the registry.
    pub async fn status(&self) -> String {
        self.command(|reply| SwitchCommand::Dump { reply }).await
    }

    async fn command<F>(&self, build: F) -> String
    where
        F: FnOnce(oneshot::Sender<String>) -> SwitchCommand,
    {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(build(tx)).await.is_err() {
            return String::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct PendingReply {
    sink: oneshot::Sender<PlugResponse>,
    since: Instant,
}

/// The switching task. Constructed together with its [`SwitchHandle`] and
/// consumed by [`run`](Switch::run).
pub struct Switch {
    req_rx: mpsc::Receiver<ClientRequest>,
    rsp_rx: mpsc::Receiver<PlugResponse>,
    cmd_rx: mpsc::Receiver<SwitchCommand>,
    state: SwitchState,
}

struct SwitchState {
    plugs: PlugRegistry,
    pending: HashMap<u64, PendingReply>,
    req_id: u64,
    request_ttl: Option<Duration>,
}

impl Switch {
    /// Create the switch and the handle everything else talks through.
    /// `request_ttl_secs` bounds how long a forwarded request may stay
    /// unanswered; 0 disables the sweep.
    pub fn new(request_ttl_secs: u64) -> (Switch, SwitchHandle) {
        let (req_tx, req_rx) = mpsc::channel(REQ_QUEUE_LEN);
        let (rsp_tx, rsp_rx) = mpsc::channel(RSP_QUEUE_LEN);
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_QUEUE_LEN);
        let switch = Switch {
            req_rx,
            rsp_rx,
            cmd_rx,
            state: SwitchState {
                plugs: PlugRegistry::new(),
                pending: HashMap::new(),
                req_id: 0,
                request_ttl: (request_ttl_secs > 0).then(|| Duration::from_secs(request_ttl_secs)),
            },
        };
        (
            switch,
            SwitchHandle {
                req_tx,
                rsp_tx,
                cmd_tx,
            },
        )
    }

    /// Run until a core queue closes. One event at a time; nothing else
    /// touches the registry, the pending table, or the id counter.
    pub async fn run(self) {
        let Switch {
            mut req_rx,
            mut rsp_rx,
            mut cmd_rx,
            mut state,
        } = self;

        let sweep_period = state
            .request_ttl
            .map(|ttl| (ttl / 4).max(Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(3600));
        let mut sweep = tokio::time::interval(sweep_period);

        loop {
            tokio::select! {
                req = req_rx.recv() => match req {
                    Some(cr) => state.on_client_request(cr).await,
                    None => {
                        tracing::error!("request queue closed unexpectedly");
                        break;
                    }
                },
                rsp = rsp_rx.recv() => match rsp {
                    Some(pr) => state.on_plug_response(pr),
                    None => {
                        tracing::error!("response queue closed unexpectedly");
                        break;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => state.on_command(cmd),
                    None => {
                        tracing::error!("command queue closed unexpectedly");
                        break;
                    }
                },
                _ = sweep.tick() => state.sweep_pending(),
            }
        }
        // Dropping the pending table closes every sink without a value;
        // bridges report a gateway error to their clients.
    }
}

impl SwitchState {
    async fn on_client_request(&mut self, cr: ClientRequest) {
        self.req_id += 1;
        let id = self.req_id;
        let ClientRequest {
            mut request,
            remote_addr,
            reply,
        } = cr;

        let host = match protocol::host_of(&request) {
            Some(h) => h.to_owned(),
            None => {
                metrics::record_switched("not_found");
                let _ = reply.send(PlugResponse::synthetic(
                    StatusCode::NOT_FOUND,
                    Some(&request),
                ));
                return;
            }
        };
        if !self.plugs.contains_host(&host) {
            tracing::info!(id, host = %host, "host not registered");
            metrics::record_switched("not_found");
            let _ = reply.send(PlugResponse::synthetic(
                StatusCode::NOT_FOUND,
                Some(&request),
            ));
            return;
        }
        let Some(entry) = self.plugs.alloc_for_request(&request) else {
            tracing::info!(id, host = %host, "no size band fits");
            metrics::record_switched("too_large");
            let _ = reply.send(PlugResponse::synthetic(
                StatusCode::PAYLOAD_TOO_LARGE,
                Some(&request),
            ));
            return;
        };
        let Some(outbound) = entry.checkout() else {
            // Allocation and unplug are serialized here, so this only
            // happens when the writer died before its unplug was processed.
            tracing::warn!(id, plug = entry.conn().id(), "plug outbound already closed");
            return;
        };
        let plug_id = entry.conn().id();

        request.headers_mut().insert(
            HEADER_REQUEST_ID,
            HeaderValue::from_str(&id.to_string()).expect("decimal id is a valid header value"),
        );
        if let Ok(addr) = HeaderValue::from_str(&remote_addr.to_string()) {
            request.headers_mut().append(HEADER_FORWARD_FOR, addr);
        }

        if outbound.send(request).await.is_err() {
            // Writer gone; dropping the sink makes the bridge report a
            // gateway error.
            tracing::warn!(id, plug = plug_id, "plug writer gone, request dropped");
            metrics::record_switched("plug_gone");
            return;
        }
        tracing::debug!(id, plug = plug_id, "request forwarded");
        metrics::record_switched("forwarded");
        self.pending.insert(
            id,
            PendingReply {
                sink: reply,
                since: Instant::now(),
            },
        );
    }

    fn on_plug_response(&mut self, pr: PlugResponse) {
        let id = protocol::response_id(&pr.response).and_then(|s| s.parse::<u64>().ok());
        let pending = id.and_then(|id| self.pending.remove(&id));
        match (id, pending) {
            (Some(id), Some(entry)) => {
                if entry.sink.send(pr).is_err() {
                    // Bridge gave up (client went away); dropping the
                    // response releases the plug reader regardless.
                    tracing::debug!(id, "bridge gone before response");
                }
                tracing::debug!(id, pending = self.pending.len(), "response dispatched");
            }
            _ => {
                tracing::warn!(id, "unsolicited response dropped");
            }
        }
    }

    fn on_command(&mut self, cmd: SwitchCommand) {
        match cmd {
            SwitchCommand::HostCount { hosts, reply } => {
                let count = if hosts.is_empty() {
                    self.plugs.size().0
                } else {
                    hosts
                        .iter()
                        .filter(|h| self.plugs.contains_host(h))
                        .count()
                };
                let _ = reply.send(count.to_string());
            }
            SwitchCommand::PlugIn { plug, reply } => {
                let _ = reply.send(self.plugs.register(&plug).to_string());
            }
            SwitchCommand::PlugOut { plug, reply } => {
                // Close the outbound queue first so the writer exits, then
                // drop the registry entries.
                plug.close_outbound();
                let _ = reply.send(self.plugs.unregister(&plug).to_string());
            }
            SwitchCommand::Dump { reply } => {
                let _ = reply.send(self.plugs.dump(false));
            }
        }
    }

    fn sweep_pending(&mut self) {
        let Some(ttl) = self.request_ttl else { return };
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.since) > ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(entry) = self.pending.remove(&id) {
                tracing::warn!(id, "pending request timed out");
                metrics::record_switched("timed_out");
                let _ = entry.sink.send(PlugResponse::synthetic(
                    StatusCode::GATEWAY_TIMEOUT,
                    None::<&Request<Bytes>>,
                ));
            }
        }
    }
}
