//! End-to-end tunnel tests: a real hub and plugs over real sockets.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::ClientRequestBuilder;

use webx::config::{HubConfig, PlugConfig};
use webx::HubServer;

mod common;

fn hub_config(http: SocketAddr, plug: SocketAddr, request_ttl_secs: u64) -> HubConfig {
    HubConfig {
        http_ports: vec![http.to_string()],
        https_ports: Vec::new(),
        plug_port: plug.to_string(),
        request_ttl_secs,
        ..Default::default()
    }
}

fn plug_config(plug: SocketAddr, host: &str, origin: SocketAddr, limit: i64) -> PlugConfig {
    PlugConfig {
        hub_url: format!("ws://{plug}/_webx"),
        limit,
        retry_wait_secs: 1,
        hosts: vec![host.to_string()],
        origins: vec![format!("http://{origin}")],
        ..Default::default()
    }
}

/// Poll the status endpoint until it reports `n` connected plugs.
async fn wait_for_plugs(plug_addr: SocketAddr, n: u64) {
    common::wait_for("plug registration", Duration::from_secs(10), || async move {
        let status = common::try_raw_request(
            plug_addr,
            "GET /_webx HTTP/1.1\r\nhost: hub\r\nconnection: close\r\n\r\n",
        )
        .await;
        status.is_some_and(|status| status.contains(&format!("\"num_plugs\":{n}")))
    })
    .await;
}

fn get_for_host(host: &str) -> String {
    format!("GET /x HTTP/1.1\r\nhost: {host}\r\nconnection: close\r\n\r\n")
}

fn post_for_host(host: &str, body_len: usize) -> String {
    format!(
        "POST /u HTTP/1.1\r\nhost: {host}\r\ncontent-length: {body_len}\r\nconnection: close\r\n\r\n{}",
        "x".repeat(body_len)
    )
}

#[tokio::test]
async fn relays_a_request_end_to_end() {
    let origin: SocketAddr = "127.0.0.1:28511".parse().unwrap();
    let http: SocketAddr = "127.0.0.1:28512".parse().unwrap();
    let plug: SocketAddr = "127.0.0.1:28513".parse().unwrap();

    common::start_mock_origin(origin, "200 OK", "keep-alive: timeout=5\r\n", "ok").await;
    tokio::spawn(HubServer::new(hub_config(http, plug, 30)).run());
    tokio::spawn(webx::plug::run(plug_config(plug, "a.example", origin, 0)));
    wait_for_plugs(plug, 1).await;

    let response = common::raw_request(http, &get_for_host("a.example")).await;
    let lower = response.to_ascii_lowercase();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");
    // First request of a fresh hub, id echoed by the plug.
    assert!(lower.contains("x-webx-request-id: 1"), "{response}");
    // Hop-by-hop headers from the origin do not reach the client.
    assert!(!lower.contains("keep-alive: timeout=5"), "{response}");
}

#[tokio::test]
async fn unknown_host_is_denied_with_404() {
    let http: SocketAddr = "127.0.0.1:28521".parse().unwrap();
    let plug: SocketAddr = "127.0.0.1:28522".parse().unwrap();

    tokio::spawn(HubServer::new(hub_config(http, plug, 30)).run());
    // The status endpoint doubles as the readiness probe.
    wait_for_plugs(plug, 0).await;

    let response = common::raw_request(http, &get_for_host("nope.example")).await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
}

#[tokio::test]
async fn size_bands_route_by_content_length() {
    let origin_small: SocketAddr = "127.0.0.1:28531".parse().unwrap();
    let origin_large: SocketAddr = "127.0.0.1:28532".parse().unwrap();
    let http: SocketAddr = "127.0.0.1:28533".parse().unwrap();
    let plug: SocketAddr = "127.0.0.1:28534".parse().unwrap();

    common::start_mock_origin(origin_small, "200 OK", "", "small").await;
    common::start_mock_origin(origin_large, "200 OK", "", "large").await;
    tokio::spawn(HubServer::new(hub_config(http, plug, 30)).run());
    tokio::spawn(webx::plug::run(plug_config(plug, "a.example", origin_small, 1000)));
    tokio::spawn(webx::plug::run(plug_config(plug, "a.example", origin_large, 1_000_000)));
    wait_for_plugs(plug, 2).await;

    let response = common::raw_request(http, &post_for_host("a.example", 500)).await;
    assert!(response.ends_with("small"), "{response}");

    let response = common::raw_request(http, &post_for_host("a.example", 5000)).await;
    assert!(response.ends_with("large"), "{response}");

    let response = common::raw_request(http, &post_for_host("a.example", 2_000_000)).await;
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");
}

#[tokio::test]
async fn round_robin_rotates_within_a_band() {
    let origins: Vec<SocketAddr> = vec![
        "127.0.0.1:28541".parse().unwrap(),
        "127.0.0.1:28542".parse().unwrap(),
        "127.0.0.1:28543".parse().unwrap(),
    ];
    let http: SocketAddr = "127.0.0.1:28544".parse().unwrap();
    let plug: SocketAddr = "127.0.0.1:28545".parse().unwrap();

    common::start_mock_origin(origins[0], "200 OK", "", "p1").await;
    common::start_mock_origin(origins[1], "200 OK", "", "p2").await;
    common::start_mock_origin(origins[2], "200 OK", "", "p3").await;
    tokio::spawn(HubServer::new(hub_config(http, plug, 30)).run());
    for origin in &origins {
        tokio::spawn(webx::plug::run(plug_config(plug, "a.example", *origin, 1000)));
    }
    wait_for_plugs(plug, 3).await;

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = common::raw_request(http, &get_for_host("a.example")).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        bodies.push(response[response.len() - 2..].to_string());
    }

    // Registration order is racy, so assert the rotation shape: the first
    // three picks cover all three plugs, the fourth wraps to the first.
    let first_three: HashSet<&String> = bodies[..3].iter().collect();
    assert_eq!(first_three.len(), 3, "{bodies:?}");
    assert_eq!(bodies[3], bodies[0], "{bodies:?}");
}

#[tokio::test]
async fn plug_dying_mid_flight_times_out_the_client() {
    let http: SocketAddr = "127.0.0.1:28551".parse().unwrap();
    let plug: SocketAddr = "127.0.0.1:28552".parse().unwrap();

    tokio::spawn(HubServer::new(hub_config(http, plug, 2)).run());
    wait_for_plugs(plug, 0).await;

    // A bare-bones plug: upgrades, claims a host, then dies mid-request.
    let upgrade = ClientRequestBuilder::new(format!("ws://{plug}/_webx").parse().unwrap())
        .with_sub_protocol("webx")
        .with_header("x-proxy-for", "a.example");
    let (mut tunnel, _) = tokio_tungstenite::connect_async(upgrade).await.unwrap();
    wait_for_plugs(plug, 1).await;

    let pending =
        tokio::spawn(async move { common::raw_request(http, &get_for_host("a.example")).await });

    // The request reaches the tunnel...
    let frame = tunnel.next().await.unwrap().unwrap();
    assert!(frame.is_binary());
    // ...and the plug drops dead before answering.
    drop(tunnel);

    // The hub unregisters the plug and the pending entry is swept.
    wait_for_plugs(plug, 0).await;
    let response = pending.await.unwrap();
    assert!(response.starts_with("HTTP/1.1 504"), "{response}");
}
