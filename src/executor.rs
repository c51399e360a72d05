// src/executor.rs
//
// Consumes scheduled requests and performs each over the shared HTTP
// client, one concurrent task per request, publishing exactly one outcome
// apiece. A process-local in-flight set keeps at most one active task per
// file name so the generator never races itself on a single file.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{Exchange, FileServerClient};
use crate::consistency;
use crate::constants::IN_FLIGHT_JITTER_MAX_MS;
use crate::outcome::{Outcome, Request, RequestKind};
use crate::payload::{random_body, FileSizeState};

type InFlightSet = Arc<RwLock<HashSet<String>>>;

/// Holds a file name's in-flight slot; releases it on drop.
struct InFlightGuard {
    set: InFlightSet,
    file_name: String,
}

impl InFlightGuard {
    /// Claim the slot for `file_name`, busy-waiting with a randomized
    /// per-task jitter while another task holds it.
    async fn acquire(set: InFlightSet, file_name: &str) -> Self {
        let jitter = Duration::from_millis(rand::rng().random_range(0..IN_FLIGHT_JITTER_MAX_MS));
        loop {
            {
                let mut held = set.write();
                if !held.contains(file_name) {
                    held.insert(file_name.to_string());
                    break;
                }
            }
            tokio::time::sleep(jitter).await;
        }
        Self {
            set: Arc::clone(&set),
            file_name: file_name.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.write().remove(&self.file_name);
    }
}

pub struct Executor {
    client: FileServerClient,
    sizes: Arc<FileSizeState>,
    in_flight: InFlightSet,
    results: mpsc::Sender<Outcome>,
}

impl Executor {
    pub fn new(
        client: FileServerClient,
        sizes: Arc<FileSizeState>,
        results: mpsc::Sender<Outcome>,
    ) -> Self {
        Self {
            client,
            sizes,
            in_flight: Arc::new(RwLock::new(HashSet::new())),
            results,
        }
    }

    /// Dispatch until the request queue closes. In-flight tasks run to
    /// completion (or their timeout) after the queue drains.
    pub async fn run(self, mut queue: mpsc::Receiver<Request>) {
        while let Some(request) = queue.recv().await {
            let task = RequestTask {
                client: self.client.clone(),
                sizes: Arc::clone(&self.sizes),
                in_flight: Arc::clone(&self.in_flight),
                results: self.results.clone(),
            };
            tokio::spawn(async move { task.execute(request).await });
        }
        debug!("request queue closed; dispatcher exiting");
    }
}

struct RequestTask {
    client: FileServerClient,
    sizes: Arc<FileSizeState>,
    in_flight: InFlightSet,
    results: mpsc::Sender<Outcome>,
}

impl RequestTask {
    async fn execute(self, request: Request) {
        let _guard = InFlightGuard::acquire(Arc::clone(&self.in_flight), &request.file_name).await;
        let start = Instant::now();

        let mut outcome = match request.kind {
            RequestKind::Get => {
                self.classify(&request, self.client.get(&request.file_name).await)
            }
            RequestKind::Put | RequestKind::Create => {
                let body = random_body(self.sizes.draw_size());
                self.classify(&request, self.client.put(&request.file_name, body).await)
            }
            RequestKind::Delete => {
                self.classify(&request, self.client.delete(&request.file_name).await)
            }
            RequestKind::Consistency => {
                let verdict =
                    consistency::run_probe(&self.client, &self.sizes, &request.file_name).await;
                Outcome {
                    kind: request.kind,
                    file_name: request.file_name.clone(),
                    status: verdict.status,
                    duration: Duration::ZERO,
                    failed: verdict.failed,
                    message: verdict.message,
                    error: verdict.error,
                }
            }
        };
        outcome.duration = start.elapsed();

        if self.results.send(outcome).await.is_err() {
            warn!("result stream closed; dropping outcome");
        }
    }

    /// Turn a raw exchange into an outcome: transport problems and any
    /// status of 400 or above are failures for these single-request kinds.
    fn classify(&self, request: &Request, result: Result<Exchange>) -> Outcome {
        match result {
            Ok(exchange) => Outcome {
                kind: request.kind,
                file_name: request.file_name.clone(),
                status: Some(exchange.status),
                duration: Duration::ZERO,
                failed: exchange.status.as_u16() >= 400,
                message: exchange.body,
                error: None,
            },
            Err(err) => Outcome::failure(
                request.kind,
                request.file_name.clone(),
                None,
                Duration::ZERO,
                format!("{} {} failed: {err:#}", request.kind, request.file_name),
                Some(format!("{err:#}")),
            ),
        }
    }
}
