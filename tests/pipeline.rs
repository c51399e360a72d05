// End-to-end pipeline runs against an in-process server: scheduler ->
// executor -> aggregator -> oracle feedback, with ordered shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use common::{endpoint_for, spawn_server};
use fsload::client::FileServerClient;
use fsload::config::EndpointConfig;
use fsload::executor::Executor;
use fsload::oracle::Oracle;
use fsload::payload::FileSizeState;
use fsload::scheduler::{RateState, Scheduler, SchedulerConfig};
use fsload::stats::{Aggregator, RollingStats};

struct Pipeline {
    stats: Arc<RollingStats>,
    oracle: Arc<Oracle>,
    shutdown_tx: watch::Sender<bool>,
    aggregator: tokio::task::JoinHandle<()>,
}

fn start_pipeline(
    endpoint: EndpointConfig,
    rate: usize,
    tick: Duration,
    max_file_count: usize,
    max_file_size: u64,
) -> Pipeline {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (request_tx, request_rx) = mpsc::channel(4096);
    let (result_tx, result_rx) = mpsc::channel(4096);
    let (failure_tx, failure_rx) = mpsc::channel(256);
    let (success_tx, success_rx) = mpsc::channel(256);

    let oracle = Arc::new(Oracle::new(max_file_count));
    let sizes = Arc::new(FileSizeState::new(max_file_size, false));
    let client = FileServerClient::new(endpoint).unwrap();
    let stats = Arc::new(RollingStats::new(tick));

    let failure_oracle = Arc::clone(&oracle);
    tokio::spawn(async move { failure_oracle.merge_failures(failure_rx).await });
    let success_oracle = Arc::clone(&oracle);
    tokio::spawn(async move { success_oracle.merge_successes(success_rx).await });

    let scheduler = Scheduler::new(
        Arc::clone(&oracle),
        SchedulerConfig {
            tick,
            max_writes_per_tick: 30,
        },
        RateState::new(rate, 0.0, false),
        request_tx,
        shutdown_rx,
    );
    tokio::spawn(scheduler.run());

    let executor = Executor::new(client, sizes, result_tx);
    tokio::spawn(executor.run(request_rx));

    let aggregator = Aggregator::new(
        Arc::clone(&stats),
        failure_tx,
        success_tx,
        shutdown_tx.clone(),
    );
    let aggregator = tokio::spawn(aggregator.run(result_rx));

    Pipeline {
        stats,
        oracle,
        shutdown_tx,
        aggregator,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_run_produces_outcomes_and_no_failures() {
    let (addr, _storage) = spawn_server(Duration::from_millis(5), 25).await;
    let pipeline = start_pipeline(
        endpoint_for(addr),
        4,
        Duration::from_millis(200),
        5,
        64,
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    pipeline.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), pipeline.aggregator)
        .await
        .expect("aggregator did not drain within the grace period")
        .unwrap();

    let snap = pipeline.stats.snapshot();
    assert!(snap.requests >= 8, "only {} requests recorded", snap.requests);
    assert_eq!(snap.failures, 0, "clean server produced failures: {:?}", snap);
    assert!(snap.consistencies >= 1, "no consistency probe ran");
    assert!(
        snap.http_errors.is_empty() && snap.other_errors.is_empty(),
        "clean run left entries in the error tables: {:?} / {:?}",
        snap.http_errors,
        snap.other_errors
    );
    assert!(
        pipeline.oracle.tracked_len() <= 5,
        "tracked population exceeded the cap"
    );

    let report = pipeline.stats.score();
    assert_eq!(report.success_rate, 1.0);
    assert_eq!(report.consistency_rate, 1.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn fully_throttled_run_scores_zero() {
    // Zero admission slots: every request is refused with a 429.
    let (addr, _storage) = spawn_server(Duration::from_millis(1), 0).await;
    let pipeline = start_pipeline(
        endpoint_for(addr),
        10,
        Duration::from_millis(100),
        50,
        64,
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    pipeline.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), pipeline.aggregator)
        .await
        .expect("aggregator did not drain")
        .unwrap();

    let snap = pipeline.stats.snapshot();
    assert!(snap.failures > 0, "throttled run recorded no failures");
    assert_eq!(snap.successes, 0);
    assert!(snap.throttled > 0, "429s were not counted as throttles");
    assert_eq!(snap.server_errors, 0, "429s leaked into the 5xx counter");

    let report = pipeline.stats.score();
    assert_eq!(report.success_rate, 0.0);
    assert_eq!(report.score, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_writes_never_populate_the_tracked_set() {
    // Server refuses everything, so nothing can actually be written; the
    // tracked set must stay empty rather than fill with ghost files.
    let (addr, _storage) = spawn_server(Duration::from_millis(1), 0).await;
    let pipeline = start_pipeline(
        endpoint_for(addr),
        6,
        Duration::from_millis(100),
        20,
        32,
    );

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(
        pipeline.oracle.tracked_len(),
        0,
        "failed CREATEs leaked into the tracked set"
    );
    pipeline.shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), pipeline.aggregator).await;
}
