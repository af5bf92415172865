//! Plug registry: hosts x size-bands x round-robin selection.
//!
//! # Responsibilities
//! - Track admitted plug connections per virtual host
//! - Group plugs for one host into bundles by advertised size limit
//! - Allocate the smallest qualifying band, round robin within it
//! - Produce the JSON snapshot served by the status endpoint
//!
//! # Design Decisions
//! - Owned exclusively by the switch task; no internal locking
//! - Bundle lists kept sorted ascending by limit (binary search)
//! - Strict round robin within a bundle, not least-loaded
//! - The round-robin cursor lives in the stored bundle, so an advance
//!   survives the selection that made it

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::Request;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;

use crate::protocol;

/// Outbound queue length of one plug connection.
pub const OUT_BUFFER_LEN: usize = 5;

/// One tunnel connection to a plug process.
///
/// Shared between the switch task, which forwards requests into the
/// outbound queue, and the connection's reader and writer tasks.
#[derive(Debug)]
pub struct PlugConn {
    /// Virtual hosts this connection serves.
    hosts: Vec<String>,
    /// Largest request content length the plug accepts. A plug that
    /// advertises no limit (or 0) is normalized to `u64::MAX` here, before
    /// it ever reaches the registry.
    limit: u64,
    /// Outbound queue feeding the connection's writer. Taken on unplug so
    /// the writer observes a closed channel and exits.
    outbound: Mutex<Option<mpsc::Sender<Request<Bytes>>>>,
    /// Registry-assigned id; 0 until admitted.
    id: AtomicU64,
    /// Unix seconds at construction.
    birth: u64,
    /// Requests forwarded through this connection, across all hosts.
    uses: AtomicU64,
}

impl PlugConn {
    /// Create a connection for `hosts` with the advertised `limit`
    /// (0 means unbounded), returning it with its outbound queue receiver.
    pub fn new(hosts: Vec<String>, limit: u64) -> (Arc<PlugConn>, mpsc::Receiver<Request<Bytes>>) {
        let (tx, rx) = mpsc::channel(OUT_BUFFER_LEN);
        let birth = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let conn = Arc::new(PlugConn {
            hosts,
            limit: if limit == 0 { u64::MAX } else { limit },
            outbound: Mutex::new(Some(tx)),
            id: AtomicU64::new(0),
            birth,
            uses: AtomicU64::new(0),
        });
        (conn, rx)
    }

    /// Virtual hosts this connection serves.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Normalized size limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Registry id, 0 when not admitted.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    /// Unix seconds at construction.
    pub fn birth(&self) -> u64 {
        self.birth
    }

    /// Requests forwarded through this connection.
    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    /// Clone of the outbound sender, or `None` once the plug was unplugged.
    pub fn sender(&self) -> Option<mpsc::Sender<Request<Bytes>>> {
        self.outbound.lock().unwrap().clone()
    }

    /// Close the outbound queue. The writer drains what is already
    /// buffered, then exits and closes the transport.
    pub fn close_outbound(&self) {
        self.outbound.lock().unwrap().take();
    }
}

// The status dump exposes only the id; the rest of the connection state is
// either internal plumbing or already visible on the entry.
impl Serialize for PlugConn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("PlugConn", 1)?;
        st.serialize_field("Id", &self.id())?;
        st.end()
    }
}

/// A registry record binding one connection into one (host, band) slot.
///
/// The per-entry use count is distinct from the connection's: a connection
/// serving several hosts appears in one entry per host.
#[derive(Debug, Serialize)]
pub struct PlugEntry {
    #[serde(rename = "Uses")]
    uses: u64,
    #[serde(rename = "Conn")]
    conn: Arc<PlugConn>,
}

impl PlugEntry {
    /// Account one forwarded request and hand out the outbound sender.
    /// `None` when the plug was already unplugged.
    pub fn checkout(&mut self) -> Option<mpsc::Sender<Request<Bytes>>> {
        let tx = self.conn.sender()?;
        self.uses += 1;
        self.conn.uses.fetch_add(1, Ordering::Relaxed);
        Some(tx)
    }

    /// The underlying connection.
    pub fn conn(&self) -> &Arc<PlugConn> {
        &self.conn
    }

    /// Requests forwarded through this entry.
    pub fn uses(&self) -> u64 {
        self.uses
    }
}

/// Plugs for one host sharing the same size limit, used round robin.
#[derive(Debug, Serialize)]
pub struct PlugBundle {
    #[serde(rename = "Limit")]
    limit: u64,
    #[serde(skip)]
    next: usize,
    #[serde(rename = "Plugs")]
    entries: Vec<PlugEntry>,
}

/// Registered plugs per virtual host.
///
/// Each host maps to a list of bundles sorted ascending by limit; each
/// bundle holds the entries of plugs advertising that limit. A connection
/// may appear under several hosts, always with the same limit.
#[derive(Debug, Default, Serialize)]
pub struct PlugRegistry {
    #[serde(rename = "Hosts")]
    hosts: BTreeMap<String, Vec<PlugBundle>>,
    #[serde(rename = "num_plugs")]
    num_plugs: usize,
    #[serde(skip)]
    plug_seed: u64,
}

impl PlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection for all its hosts. Returns the number of entries
    /// added: the size of the hosts set on success, 0 when the connection
    /// has no hosts or is already registered.
    pub fn register(&mut self, conn: &Arc<PlugConn>) -> usize {
        if conn.hosts().is_empty() || conn.id() != 0 {
            tracing::warn!(id = conn.id(), "plug denied");
            return 0;
        }
        let limit = conn.limit();
        let mut added = 0;
        for host in conn.hosts() {
            let bundles = self.hosts.entry(host.clone()).or_default();
            match bundles.binary_search_by(|b| b.limit.cmp(&limit)) {
                Ok(i) => bundles[i].entries.push(PlugEntry {
                    uses: 0,
                    conn: conn.clone(),
                }),
                Err(i) => bundles.insert(
                    i,
                    PlugBundle {
                        limit,
                        next: 0,
                        entries: vec![PlugEntry {
                            uses: 0,
                            conn: conn.clone(),
                        }],
                    },
                ),
            }
            added += 1;
        }
        self.plug_seed += 1;
        conn.id.store(self.plug_seed, Ordering::Relaxed);
        self.num_plugs += 1;
        tracing::info!(id = self.plug_seed, hosts = added, limit, "plugged in");
        added
    }

    /// Drop every entry referring to `conn`. Returns the number of entries
    /// removed; 0 when the connection has no hosts or was never admitted.
    pub fn unregister(&mut self, conn: &Arc<PlugConn>) -> usize {
        if conn.hosts().is_empty() || conn.id() == 0 {
            return 0;
        }
        let limit = conn.limit();
        let mut dropped = 0;
        for host in conn.hosts() {
            let mut emptied = false;
            if let Some(bundles) = self.hosts.get_mut(host) {
                if let Ok(i) = bundles.binary_search_by(|b| b.limit.cmp(&limit)) {
                    let bundle = &mut bundles[i];
                    if let Some(j) = bundle
                        .entries
                        .iter()
                        .position(|e| Arc::ptr_eq(&e.conn, conn))
                    {
                        bundle.entries.remove(j);
                        dropped += 1;
                    }
                    if bundle.entries.is_empty() {
                        bundles.remove(i);
                    }
                }
                emptied = bundles.is_empty();
            }
            if emptied {
                self.hosts.remove(host);
            }
        }
        if dropped > 0 {
            self.num_plugs -= 1;
            tracing::info!(id = conn.id(), dropped, "unplugged");
        } else {
            tracing::warn!(id = conn.id(), "unplug: not registered");
        }
        dropped
    }

    /// Pick a connection for `host` accepting `size` bytes: the first
    /// bundle in ascending-limit order with `limit >= size`, round robin
    /// within that bundle. `None` when the host is unknown or no band
    /// fits.
    pub fn alloc(&mut self, host: &str, size: u64) -> Option<&mut PlugEntry> {
        let bundles = self.hosts.get_mut(host)?;
        let bundle = bundles
            .iter_mut()
            .find(|b| b.limit >= size && !b.entries.is_empty())?;
        let picked = bundle.next % bundle.entries.len();
        bundle.next = (picked + 1) % bundle.entries.len();
        Some(&mut bundle.entries[picked])
    }

    /// Pick a connection for the request's host and declared content
    /// length (0 when the header is absent or unparseable).
    pub fn alloc_for_request(&mut self, req: &Request<Bytes>) -> Option<&mut PlugEntry> {
        let host = protocol::host_of(req)?;
        let size = protocol::content_length(req);
        self.alloc(host, size)
    }

    /// Whether at least one plug serves `host`.
    pub fn contains_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    /// Number of registered hosts and of distinct connections.
    pub fn size(&self) -> (usize, usize) {
        (self.hosts.len(), self.num_plugs)
    }

    /// JSON snapshot for status queries. Field names are stable; the
    /// round-robin cursors and the id seed are not part of the snapshot.
    pub fn dump(&self, pretty: bool) -> String {
        let out = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        out.unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plug(hosts: &[&str], limit: u64) -> Arc<PlugConn> {
        let (conn, _rx) = PlugConn::new(hosts.iter().map(|h| h.to_string()).collect(), limit);
        conn
    }

    #[test]
    fn register_assigns_ids_and_counts() {
        let mut reg = PlugRegistry::new();
        let p1 = plug(&["a.example"], 0);
        let p2 = plug(&["a.example", "b.example"], 1000);

        assert_eq!(reg.register(&p1), 1);
        assert_eq!(reg.register(&p2), 2);
        assert_eq!(p1.id(), 1);
        assert_eq!(p2.id(), 2);
        assert_eq!(reg.size(), (2, 2));
    }

    #[test]
    fn double_register_is_rejected() {
        let mut reg = PlugRegistry::new();
        let p = plug(&["a.example"], 0);
        assert_eq!(reg.register(&p), 1);
        assert_eq!(reg.register(&p), 0);
        assert_eq!(p.id(), 1);
        assert_eq!(reg.size(), (1, 1));
    }

    #[test]
    fn hostless_plug_is_rejected() {
        let mut reg = PlugRegistry::new();
        let p = plug(&[], 0);
        assert_eq!(reg.register(&p), 0);
        assert_eq!(reg.size(), (0, 0));
    }

    #[test]
    fn snapshot_restored_after_unregister() {
        let mut reg = PlugRegistry::new();
        let stay = plug(&["a.example"], 1000);
        reg.register(&stay);
        let before = reg.dump(false);

        let p = plug(&["a.example", "b.example"], 500);
        assert_eq!(reg.register(&p), 2);
        assert_ne!(reg.dump(false), before);
        assert_eq!(reg.unregister(&p), 2);
        assert_eq!(reg.dump(false), before);
    }

    #[test]
    fn bundles_stay_sorted_ascending() {
        let mut reg = PlugRegistry::new();
        reg.register(&plug(&["a.example"], 1000));
        reg.register(&plug(&["a.example"], 0));
        reg.register(&plug(&["a.example"], 100));

        let bundles = &reg.hosts["a.example"];
        assert_eq!(bundles.len(), 3);
        assert_eq!(bundles[0].limit, 100);
        assert_eq!(bundles[1].limit, 1000);
        assert_eq!(bundles[2].limit, u64::MAX);
        assert!(bundles.iter().all(|b| !b.entries.is_empty()));
    }

    #[test]
    fn alloc_picks_smallest_qualifying_band() {
        let mut reg = PlugRegistry::new();
        let small = plug(&["a.example"], 1000);
        let large = plug(&["a.example"], 1_000_000);
        reg.register(&small);
        reg.register(&large);

        let e = reg.alloc("a.example", 500).unwrap();
        assert!(Arc::ptr_eq(e.conn(), &small));
        let e = reg.alloc("a.example", 5000).unwrap();
        assert!(Arc::ptr_eq(e.conn(), &large));
        assert!(reg.alloc("a.example", 2_000_000).is_none());
        assert!(reg.alloc("nope.example", 0).is_none());
    }

    #[test]
    fn round_robin_cursor_persists() {
        let mut reg = PlugRegistry::new();
        let plugs: Vec<_> = (0..3).map(|_| plug(&["a.example"], 1000)).collect();
        for p in &plugs {
            reg.register(p);
        }

        let picked: Vec<u64> = (0..4)
            .map(|_| reg.alloc("a.example", 100).unwrap().conn().id())
            .collect();
        assert_eq!(
            picked,
            vec![plugs[0].id(), plugs[1].id(), plugs[2].id(), plugs[0].id()]
        );
    }

    #[test]
    fn round_robin_is_fair_within_bundle() {
        let mut reg = PlugRegistry::new();
        let plugs: Vec<_> = (0..3).map(|_| plug(&["a.example"], 1000)).collect();
        for p in &plugs {
            reg.register(p);
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(reg.alloc("a.example", 0).unwrap().conn().id());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn unregister_drops_all_hosts_of_a_conn() {
        let mut reg = PlugRegistry::new();
        let p = plug(&["a.example", "b.example"], 0);
        reg.register(&p);
        assert_eq!(reg.size(), (2, 1));

        assert_eq!(reg.unregister(&p), 2);
        assert_eq!(reg.size(), (0, 0));
        assert!(!reg.contains_host("a.example"));
        assert!(!reg.contains_host("b.example"));
    }

    #[test]
    fn unregister_unknown_is_a_noop() {
        let mut reg = PlugRegistry::new();
        let admitted = plug(&["a.example"], 0);
        reg.register(&admitted);

        let stranger = plug(&["a.example"], 0);
        assert_eq!(reg.unregister(&stranger), 0);
        assert_eq!(reg.size(), (1, 1));
    }

    #[test]
    fn alloc_for_request_uses_declared_length() {
        let mut reg = PlugRegistry::new();
        let small = plug(&["a.example"], 1000);
        reg.register(&small);

        let fits = Request::builder()
            .uri("/upload")
            .header("host", "a.example")
            .header("content-length", "900")
            .body(Bytes::new())
            .unwrap();
        assert!(reg.alloc_for_request(&fits).is_some());

        let too_big = Request::builder()
            .uri("/upload")
            .header("host", "a.example")
            .header("content-length", "1001")
            .body(Bytes::new())
            .unwrap();
        assert!(reg.alloc_for_request(&too_big).is_none());
    }

    #[test]
    fn checkout_accounts_both_counters() {
        let mut reg = PlugRegistry::new();
        let p = plug(&["a.example", "b.example"], 0);
        reg.register(&p);

        let entry = reg.alloc("a.example", 0).unwrap();
        assert!(entry.checkout().is_some());
        assert_eq!(entry.uses(), 1);
        assert_eq!(p.uses(), 1);

        let entry = reg.alloc("b.example", 0).unwrap();
        assert!(entry.checkout().is_some());
        assert_eq!(entry.uses(), 1);
        assert_eq!(p.uses(), 2);
    }

    #[test]
    fn checkout_fails_after_outbound_closed() {
        let mut reg = PlugRegistry::new();
        let p = plug(&["a.example"], 0);
        reg.register(&p);
        p.close_outbound();
        assert!(reg.alloc("a.example", 0).unwrap().checkout().is_none());
    }

    #[test]
    fn dump_has_stable_field_names() {
        let mut reg = PlugRegistry::new();
        reg.register(&plug(&["a.example"], 1000));
        let v: serde_json::Value = serde_json::from_str(&reg.dump(false)).unwrap();
        assert_eq!(v["num_plugs"], 1);
        assert_eq!(v["Hosts"]["a.example"][0]["Limit"], 1000);
        assert_eq!(v["Hosts"]["a.example"][0]["Plugs"][0]["Uses"], 0);
        assert_eq!(v["Hosts"]["a.example"][0]["Plugs"][0]["Conn"]["Id"], 1);
    }
}
