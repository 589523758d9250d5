//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pooled_proxy::config::ProxyConfig;
use pooled_proxy::http::{Message, REQUEST_ID_HEADER};
use pooled_proxy::net::listener::Listener;
use pooled_proxy::proxy::EngineStats;
use pooled_proxy::{ProxyServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Counters kept by the test origin.
#[derive(Debug, Default)]
pub struct OriginStats {
    pub requests: AtomicUsize,
    pub connections: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// A keep-alive origin on an ephemeral port.
///
/// Answers every request with `200 OK`, a `path=<uri>` body and the echoed
/// `Request-Id`. Paths ending in `.css` are cacheable for 60 seconds; paths
/// starting with `/slow` are delayed by 50 ms.
pub async fn start_origin() -> (SocketAddr, Arc<OriginStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(OriginStats::default());

    let shared = stats.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            shared.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_origin_connection(socket, shared.clone()));
        }
    });

    (addr, stats)
}

async fn serve_origin_connection(mut socket: TcpStream, stats: Arc<OriginStats>) {
    let mut buf = vec![0u8; 4096];
    let mut request = Message::request();

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.feed(&buf[..n]);
        if !request.is_complete() {
            continue;
        }

        let current = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(current, Ordering::SeqCst);
        stats.requests.fetch_add(1, Ordering::SeqCst);

        let uri = request.uri().to_string();
        if uri.starts_with("/slow") {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let max_age = if uri.ends_with(".css") { 60 } else { 0 };
        let body = format!("path={uri}");
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nCache-Control: max-age={max_age}\r\nContent-Length: {}\r\n",
            body.len()
        );
        if let Some(id) = request.header(REQUEST_ID_HEADER) {
            response.push_str(&format!("Request-Id: {id}\r\n"));
        }
        response.push_str("\r\n");
        response.push_str(&body);

        stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        request = Message::request();
    }
}

/// A running proxy under test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub stats: watch::Receiver<EngineStats>,
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(origin: SocketAddr, pool_size: usize) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.upstream.host = origin.ip().to_string();
    config.upstream.port = origin.port();
    config.upstream.pool_size = pool_size;
    config.engine.poll_interval_ms = 50;

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 256);

    let server = ProxyServer::new(config);
    let stats = server.stats();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(listener, shutdown.clone()));

    let proxy = TestProxy { addr, shutdown, stats };
    wait_for_idle(&proxy, pool_size).await;
    proxy
}

/// Wait until `n` upstream connections sit in the idle pool.
pub async fn wait_for_idle(proxy: &TestProxy, n: usize) {
    let mut stats = proxy.stats.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        stats.wait_for(|stats| stats.idle_connections == n),
    )
    .await
    .expect("upstream pool did not connect in time")
    .expect("proxy stopped");
}

/// Write `request` and read exactly one response.
pub async fn exchange(stream: &mut TcpStream, request: &str) -> Message {
    stream.write_all(request.as_bytes()).await.unwrap();
    read_response(stream).await
}

pub async fn read_response(stream: &mut TcpStream) -> Message {
    let mut response = Message::response();
    let mut buf = vec![0u8; 4096];

    tokio::time::timeout(Duration::from_secs(5), async {
        while !response.is_complete() {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before response completed");
            response.feed(&buf[..n]);
        }
    })
    .await
    .expect("timed out waiting for response");

    response
}
