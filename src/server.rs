// src/server.rs
//
// The throttled file server: opaque blobs stored on the local filesystem
// under a name-addressed URL. Admission is bounded, every handled request
// pays a fixed artificial latency, and operations on one file name are
// serialized.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{error, info};

use crate::constants::{
    DEFAULT_PATH_PREFIX, IN_FLIGHT_JITTER_MAX_MS, SERVER_BASE_LATENCY, SERVER_DEFAULT_PORT,
    SERVER_MAX_CONNECTIONS,
};

/// Uploads can be large: huge-file mode sends ~10 MiB of Base64.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub path_prefix: String,
    pub storage_dir: PathBuf,
    pub max_connections: usize,
    pub base_latency: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: SERVER_DEFAULT_PORT,
            path_prefix: DEFAULT_PATH_PREFIX.into(),
            storage_dir: std::env::temp_dir(),
            max_connections: SERVER_MAX_CONNECTIONS,
            base_latency: SERVER_BASE_LATENCY,
        }
    }
}

pub struct FileServer {
    cfg: ServerConfig,
    connections: AtomicUsize,
    /// Names this process believes it holds; misses fall back to the
    /// filesystem in case another process wrote the file.
    known_files: RwLock<HashSet<String>>,
    in_process: RwLock<HashSet<String>>,
}

impl FileServer {
    pub fn new(cfg: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            connections: AtomicUsize::new(0),
            known_files: RwLock::new(HashSet::new()),
            in_process: RwLock::new(HashSet::new()),
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        let path = format!("/{}/{{filename}}", self.cfg.path_prefix);
        Router::new()
            .route(
                &path,
                get(handle_get).put(handle_put).delete(handle_delete),
            )
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self)
    }

    /// Bind and serve until the process exits.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.cfg.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(
            "file server listening on {} (prefix /{}, storage {})",
            addr,
            self.cfg.path_prefix,
            self.cfg.storage_dir.display()
        );
        let router = self.router();
        axum::serve(listener, router)
            .await
            .context("file server failed")
    }

    async fn simulate_latency(&self) {
        if !self.cfg.base_latency.is_zero() {
            tokio::time::sleep(self.cfg.base_latency).await;
        }
    }

    fn file_path(&self, file_name: &str) -> PathBuf {
        self.cfg.storage_dir.join(file_name)
    }
}

fn try_admit(server: &Arc<FileServer>) -> Option<ConnectionGuard> {
    let mut current = server.connections.load(Ordering::SeqCst);
    loop {
        if current >= server.cfg.max_connections {
            return None;
        }
        match server.connections.compare_exchange(
            current,
            current + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return Some(ConnectionGuard(Arc::clone(server))),
            Err(actual) => current = actual,
        }
    }
}

/// Claim the per-file slot so operations on one name never overlap.
async fn lock_file(server: &Arc<FileServer>, file_name: &str) -> FileGuard {
    let jitter = Duration::from_millis(rand::rng().random_range(0..IN_FLIGHT_JITTER_MAX_MS));
    loop {
        {
            let mut held = server.in_process.write();
            if !held.contains(file_name) {
                held.insert(file_name.to_string());
                break;
            }
        }
        tokio::time::sleep(jitter).await;
    }
    FileGuard {
        server: Arc::clone(server),
        file_name: file_name.to_string(),
    }
}

struct ConnectionGuard(Arc<FileServer>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FileGuard {
    server: Arc<FileServer>,
    file_name: String,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        self.server.in_process.write().remove(&self.file_name);
    }
}

fn throttled() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, "Too many requests. Slow down.").into_response()
}

/// Names are opaque single path segments; anything that could escape the
/// storage directory is rejected outright.
fn valid_name(file_name: &str) -> bool {
    !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\', '\0'])
}

async fn handle_get(
    State(server): State<Arc<FileServer>>,
    Path(file_name): Path<String>,
) -> Response {
    let Some(_conn) = try_admit(&server) else {
        return throttled();
    };
    server.simulate_latency().await;

    if !valid_name(&file_name) {
        return (StatusCode::BAD_REQUEST, "File name is empty or invalid.").into_response();
    }
    let _file = lock_file(&server, &file_name).await;

    let path = server.file_path(&file_name);
    if !server.known_files.read().contains(&file_name) {
        // Another process may have written it; believe the filesystem.
        if tokio::fs::metadata(&path).await.is_err() {
            return (StatusCode::NOT_FOUND, "File not found.").into_response();
        }
        server.known_files.write().insert(file_name.clone());
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            error!("failed to read {}: {err}", path.display());
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn handle_put(
    State(server): State<Arc<FileServer>>,
    Path(file_name): Path<String>,
    body: Bytes,
) -> Response {
    let Some(_conn) = try_admit(&server) else {
        return throttled();
    };
    server.simulate_latency().await;

    if !valid_name(&file_name) {
        return (StatusCode::BAD_REQUEST, "No file name provided.").into_response();
    }
    let _file = lock_file(&server, &file_name).await;

    let path = server.file_path(&file_name);
    if let Err(err) = tokio::fs::write(&path, &body).await {
        error!("failed to write {}: {err}", path.display());
        // Never leave a torn file behind a 500.
        let _ = tokio::fs::remove_file(&path).await;
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    server.known_files.write().insert(file_name);
    StatusCode::CREATED.into_response()
}

async fn handle_delete(
    State(server): State<Arc<FileServer>>,
    Path(file_name): Path<String>,
) -> Response {
    let Some(_conn) = try_admit(&server) else {
        return throttled();
    };
    server.simulate_latency().await;

    if !valid_name(&file_name) {
        return (StatusCode::BAD_REQUEST, "No file name specified.").into_response();
    }
    let _file = lock_file(&server, &file_name).await;

    server.known_files.write().remove(&file_name);

    let path = server.file_path(&file_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => StatusCode::OK.into_response(),
        // Deleting an absent file is a success: DELETE is idempotent.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => StatusCode::OK.into_response(),
        Err(err) => {
            error!("failed to delete {}: {err}", path.display());
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
