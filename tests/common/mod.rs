// Shared helpers for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use fsload::config::EndpointConfig;
use fsload::server::{FileServer, ServerConfig};

/// Spawn a file server on an ephemeral port with its own storage dir.
/// Returns the bound address and the tempdir guard keeping storage alive.
pub async fn spawn_server(
    latency: Duration,
    max_connections: usize,
) -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create storage dir");
    let server = FileServer::new(ServerConfig {
        port: 0,
        path_prefix: "api/fileserver".into(),
        storage_dir: dir.path().to_path_buf(),
        max_connections,
        base_latency: latency,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, dir)
}

pub fn endpoint_for(addr: SocketAddr) -> EndpointConfig {
    EndpointConfig {
        proto: "http".into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        path_prefix: "api/fileserver".into(),
    }
}
