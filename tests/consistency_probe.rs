// Probe behavior against a correct server and against a server that
// returns corrupted reads.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;

use common::{endpoint_for, spawn_server};
use fsload::client::FileServerClient;
use fsload::config::EndpointConfig;
use fsload::consistency::run_probe;
use fsload::payload::FileSizeState;

#[tokio::test]
async fn probe_passes_against_correct_server() {
    let (addr, _storage) = spawn_server(Duration::from_millis(1), 25).await;
    let client = FileServerClient::new(endpoint_for(addr)).unwrap();
    let sizes = FileSizeState::new(256, false);

    let verdict = run_probe(&client, &sizes, "probeTarget01").await;
    assert!(!verdict.failed, "probe failed: {}", verdict.message);
    assert_eq!(verdict.status, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn probe_leaves_nothing_behind() {
    let (addr, _storage) = spawn_server(Duration::from_millis(1), 25).await;
    let client = FileServerClient::new(endpoint_for(addr)).unwrap();
    let sizes = FileSizeState::new(64, false);

    let verdict = run_probe(&client, &sizes, "ephemeral").await;
    assert!(!verdict.failed);
    let after = client.get("ephemeral").await.unwrap();
    assert_eq!(after.status, StatusCode::NOT_FOUND);
}

/// A server that stores faithfully but flips a byte on every read.
fn corrupting_router() -> Router {
    type Store = Arc<Mutex<std::collections::HashMap<String, String>>>;
    let store: Store = Arc::new(Mutex::new(std::collections::HashMap::new()));

    async fn get_corrupted(
        State(store): State<Store>,
        Path(name): Path<String>,
    ) -> (StatusCode, String) {
        match store.lock().get(&name) {
            Some(body) => {
                let mut bytes = body.clone().into_bytes();
                if let Some(b) = bytes.first_mut() {
                    *b ^= 0x01;
                }
                (StatusCode::OK, String::from_utf8_lossy(&bytes).into_owned())
            }
            None => (StatusCode::NOT_FOUND, "File not found.".into()),
        }
    }

    async fn put_faithful(
        State(store): State<Store>,
        Path(name): Path<String>,
        body: String,
    ) -> StatusCode {
        store.lock().insert(name, body);
        StatusCode::CREATED
    }

    async fn delete_faithful(State(store): State<Store>, Path(name): Path<String>) -> StatusCode {
        store.lock().remove(&name);
        StatusCode::OK
    }

    Router::new()
        .route(
            "/api/fileserver/{filename}",
            get(get_corrupted).put(put_faithful).delete(delete_faithful),
        )
        .with_state(store)
}

#[tokio::test]
async fn probe_fails_on_corrupted_read() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, corrupting_router()).await.unwrap();
    });

    let client = FileServerClient::new(EndpointConfig {
        proto: "http".into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        path_prefix: "api/fileserver".into(),
    })
    .unwrap();
    let sizes = FileSizeState::new(128, false);

    let verdict = run_probe(&client, &sizes, "bitflipped").await;
    assert!(verdict.failed, "probe passed against a corrupting server");
    assert!(
        verdict.message.contains("does not match"),
        "unexpected diagnostic: {}",
        verdict.message
    );
}

#[tokio::test]
async fn probe_fails_when_server_is_down() {
    // Bind then drop a listener so the port is very likely unbound.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = FileServerClient::new(EndpointConfig {
        proto: "http".into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        path_prefix: "api/fileserver".into(),
    })
    .unwrap();
    let sizes = FileSizeState::new(64, false);

    let verdict = run_probe(&client, &sizes, "unreachable").await;
    assert!(verdict.failed);
    assert!(verdict.error.is_some(), "transport failure lost its error");
    assert_eq!(verdict.status, None);
}
