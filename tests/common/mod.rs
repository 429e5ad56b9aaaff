//! Shared utilities for the integration tests: mock upstreams and a gateway
//! started on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use fleet_gateway::config::{GatewayConfig, RewriteConfig, ServiceConfig, TimeoutClass};
use fleet_gateway::lifecycle::Shutdown;
use fleet_gateway::GatewayServer;

/// Serve `router` on an ephemeral loopback port.
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A raw upstream that answers every connection with `response` verbatim,
/// then closes the socket. Used for malformed or truncated replies.
pub async fn spawn_raw_upstream(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Send `request` verbatim to `addr` and read the whole reply. Bypasses
/// client-side path normalisation.
pub async fn raw_request(addr: &str, request: &str) -> String {
    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}

/// An upstream that accepts connections and never answers.
pub async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn service(key: &str, prefix: &str, port: u16, rewrite: RewriteConfig) -> ServiceConfig {
    ServiceConfig {
        key: key.to_string(),
        name: format!("{} service", key),
        host: "127.0.0.1".to_string(),
        port,
        port_env: None,
        route_prefix: prefix.to_string(),
        rewrite,
        methods: ["GET", "POST", "PUT", "DELETE", "PATCH"]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        health_path: "/health".to_string(),
        timeout_class: TimeoutClass::Standard,
        streaming: false,
        launch: None,
    }
}

pub fn strip(default_path: &str) -> RewriteConfig {
    RewriteConfig::Strip {
        default_path: default_path.to_string(),
    }
}

pub fn replace(with: &str) -> RewriteConfig {
    RewriteConfig::Replace {
        with: with.to_string(),
    }
}

/// Gateway config with short ceilings so failure paths finish quickly.
pub fn test_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.port_env = None;
    config.services = services;
    config.timeouts.connect_secs = 1;
    config.timeouts.standard_secs = 1;
    config.timeouts.inference_secs = 2;
    config.timeouts.probe_ms = 300;
    config.timeouts.stream_secs = 1;
    config.supervisor.launch_gateway = false;
    config
}

/// Start the gateway on an ephemeral port. Trigger the returned handle to stop it.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config).unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
