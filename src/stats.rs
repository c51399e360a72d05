// src/stats.rs
//
// Folds outcomes into rolling and lifetime statistics, routes feedback to
// the oracle, and closes the shutdown signal when failures pile up.
//
// The merge path touches only atomics; the single mutex is reserved for
// the interval fields contended by the tick-roller and the dashboard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::constants::{
    DRAIN_GRACE, ERROR_RING_CAPACITY, HIST_MAX_US, HIST_MIN_US, HIST_SIGFIGS,
    MAX_FAILURES_BEFORE_EXIT, ROLLING_WINDOW_TICKS, ROLL_POLL_INTERVAL,
};
use crate::outcome::{Outcome, RequestKind};

/// Lifetime counters for one request kind: count, summed duration, and a
/// latency histogram for the percentile display.
struct KindStats {
    count: AtomicU64,
    duration_us: AtomicU64,
    hist: Mutex<Histogram<u64>>,
}

impl KindStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            duration_us: AtomicU64::new(0),
            hist: Mutex::new(
                Histogram::new_with_bounds(HIST_MIN_US, HIST_MAX_US, HIST_SIGFIGS)
                    .expect("static histogram bounds are valid"),
            ),
        }
    }

    fn record(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.duration_us.fetch_add(us, Ordering::Relaxed);
        let _ = self.hist.lock().record(us.max(1));
    }

    fn percentiles(&self) -> (u64, u64, u64) {
        let hist = self.hist.lock();
        (
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
        )
    }
}

/// One metric's last-N-ticks window of per-tick deltas.
#[derive(Default)]
struct Window {
    samples: VecDeque<u64>,
}

impl Window {
    fn push(&mut self, sample: u64) {
        self.samples.push_back(sample);
        while self.samples.len() > ROLLING_WINDOW_TICKS {
            self.samples.pop_front();
        }
    }

    fn average(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().sum::<u64>() / self.samples.len() as u64
    }
}

/// Cumulative totals captured at the previous tick boundary, for deltas.
#[derive(Default, Clone, Copy)]
struct TickMark {
    successes: u64,
    gets: u64,
    puts: u64,
    deletes: u64,
    consistencies: u64,
    throttled: u64,
    get_duration_us: u64,
    put_duration_us: u64,
    delete_duration_us: u64,
    consistency_duration_us: u64,
}

/// Interval state owned by the tick-roller; the dashboard reads the
/// derived averages through the same lock.
struct IntervalState {
    last_tick: Instant,
    mark: TickMark,
    totals: Window,
    successes: Window,
    gets: Window,
    puts: Window,
    deletes: Window,
    consistencies: Window,
    throttled: Window,
    current: CurrentRates,
}

/// Per-tick averages exposed to the dashboard.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentRates {
    pub total: u64,
    pub successful: u64,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub consistencies: u64,
    pub throttled: u64,
    /// Mean latency per kind over the last tick, in microseconds.
    pub get_latency_us: u64,
    pub put_latency_us: u64,
    pub delete_latency_us: u64,
    pub consistency_latency_us: u64,
}

pub struct RollingStats {
    started: Instant,
    tick: Duration,

    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    server_errors: AtomicU64,
    throttled: AtomicU64,
    consistency_failures: AtomicU64,
    interval_count: AtomicU64,
    max_successful_rps: AtomicU64,

    gets: KindStats,
    puts: KindStats,
    deletes: KindStats,
    consistencies: KindStats,

    http_errors: Mutex<VecDeque<String>>,
    other_errors: Mutex<VecDeque<String>>,

    interval: Mutex<IntervalState>,
}

impl RollingStats {
    pub fn new(tick: Duration) -> Self {
        Self {
            started: Instant::now(),
            tick,
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            consistency_failures: AtomicU64::new(0),
            interval_count: AtomicU64::new(0),
            max_successful_rps: AtomicU64::new(0),
            gets: KindStats::new(),
            puts: KindStats::new(),
            deletes: KindStats::new(),
            consistencies: KindStats::new(),
            http_errors: Mutex::new(VecDeque::new()),
            other_errors: Mutex::new(VecDeque::new()),
            interval: Mutex::new(IntervalState {
                last_tick: Instant::now(),
                mark: TickMark::default(),
                totals: Window::default(),
                successes: Window::default(),
                gets: Window::default(),
                puts: Window::default(),
                deletes: Window::default(),
                consistencies: Window::default(),
                throttled: Window::default(),
                current: CurrentRates::default(),
            }),
        }
    }

    /// Fold one outcome into the lifetime counters. A consistency probe
    /// stands for four HTTP requests, so it contributes three extra to the
    /// request and interval totals.
    pub fn merge(&self, outcome: &Outcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.interval_count.fetch_add(1, Ordering::Relaxed);

        let success = outcome.was_success();
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.was_failure() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.was_5xx() {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.was_throttled() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
        }

        if outcome.was_error() {
            if outcome.status.is_some() && !outcome.message.is_empty() {
                push_ring(&self.http_errors, format!("{}: {}", outcome.kind, outcome.message));
            } else if let Some(err) = &outcome.error {
                push_ring(&self.other_errors, err.clone());
            }
        }

        match outcome.kind {
            RequestKind::Get => self.gets.record(outcome.duration),
            RequestKind::Put | RequestKind::Create => self.puts.record(outcome.duration),
            RequestKind::Delete => self.deletes.record(outcome.duration),
            RequestKind::Consistency => {
                self.consistencies.record(outcome.duration);
                self.requests.fetch_add(3, Ordering::Relaxed);
                self.interval_count.fetch_add(3, Ordering::Relaxed);
                if success {
                    self.successes.fetch_add(3, Ordering::Relaxed);
                } else {
                    self.consistency_failures.fetch_add(1, Ordering::Relaxed);
                    push_ring(&self.other_errors, outcome.message.clone());
                }
            }
        }
    }

    /// Close out a tick if one has elapsed: snapshot deltas into the
    /// rolling windows and refresh the derived averages.
    pub fn roll_if_due(&self, now: Instant) {
        let mut interval = self.interval.lock();
        if now.duration_since(interval.last_tick) <= self.tick {
            return;
        }
        interval.last_tick = now;

        let mark = TickMark {
            successes: self.successes.load(Ordering::Relaxed),
            gets: self.gets.count.load(Ordering::Relaxed),
            puts: self.puts.count.load(Ordering::Relaxed),
            deletes: self.deletes.count.load(Ordering::Relaxed),
            consistencies: self.consistencies.count.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            get_duration_us: self.gets.duration_us.load(Ordering::Relaxed),
            put_duration_us: self.puts.duration_us.load(Ordering::Relaxed),
            delete_duration_us: self.deletes.duration_us.load(Ordering::Relaxed),
            consistency_duration_us: self.consistencies.duration_us.load(Ordering::Relaxed),
        };
        let prev = interval.mark;
        interval.mark = mark;

        interval
            .totals
            .push(self.interval_count.swap(0, Ordering::Relaxed));
        interval.successes.push(mark.successes - prev.successes);
        interval.gets.push(mark.gets - prev.gets);
        interval.puts.push(mark.puts - prev.puts);
        interval.deletes.push(mark.deletes - prev.deletes);
        interval
            .consistencies
            .push(mark.consistencies - prev.consistencies);
        interval.throttled.push(mark.throttled - prev.throttled);

        interval.current = CurrentRates {
            total: interval.totals.average(),
            successful: interval.successes.average(),
            gets: interval.gets.average(),
            puts: interval.puts.average(),
            deletes: interval.deletes.average(),
            consistencies: interval.consistencies.average(),
            throttled: interval.throttled.average(),
            get_latency_us: mean_latency(
                mark.get_duration_us - prev.get_duration_us,
                mark.gets - prev.gets,
            ),
            put_latency_us: mean_latency(
                mark.put_duration_us - prev.put_duration_us,
                mark.puts - prev.puts,
            ),
            delete_latency_us: mean_latency(
                mark.delete_duration_us - prev.delete_duration_us,
                mark.deletes - prev.deletes,
            ),
            consistency_latency_us: mean_latency(
                mark.consistency_duration_us - prev.consistency_duration_us,
                mark.consistencies - prev.consistencies,
            ),
        };

        self.max_successful_rps
            .fetch_max(interval.current.successful, Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (current, http_errors, other_errors) = {
            let interval = self.interval.lock();
            (
                interval.current,
                recent(&self.http_errors),
                recent(&self.other_errors),
            )
        };
        StatsSnapshot {
            elapsed: self.started.elapsed(),
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            consistencies: self.consistencies.count.load(Ordering::Relaxed),
            consistency_failures: self.consistency_failures.load(Ordering::Relaxed),
            max_successful_rps: self.max_successful_rps.load(Ordering::Relaxed),
            current,
            get_percentiles: self.gets.percentiles(),
            put_percentiles: self.puts.percentiles(),
            delete_percentiles: self.deletes.percentiles(),
            consistency_percentiles: self.consistencies.percentiles(),
            http_errors,
            other_errors,
        }
    }

    /// Final score: peak successful throughput weighted by run length and
    /// by how clean the run was.
    pub fn score(&self) -> ScoreReport {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let consistencies = self.consistencies.count.load(Ordering::Relaxed);
        let consistency_failures = self.consistency_failures.load(Ordering::Relaxed);

        let consistency_rate = if consistencies == 0 {
            1.0
        } else {
            1.0 - consistency_failures as f64 / consistencies as f64
        };
        let success_rate = if successes + failures == 0 {
            1.0
        } else {
            1.0 - failures as f64 / (successes + failures) as f64
        };

        let max_rps = self.max_successful_rps.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed();
        let elapsed_minutes = elapsed.as_secs_f64() / 60.0;

        ScoreReport {
            consistency_rate,
            success_rate,
            max_successful_rps: max_rps,
            elapsed,
            score: (max_rps as f64 * elapsed_minutes * consistency_rate * success_rate).round()
                as i64,
        }
    }
}

fn mean_latency(duration_delta_us: u64, count_delta: u64) -> u64 {
    if count_delta == 0 {
        0
    } else {
        duration_delta_us / count_delta
    }
}

fn push_ring(ring: &Mutex<VecDeque<String>>, entry: String) {
    let mut ring = ring.lock();
    ring.push_back(entry);
    while ring.len() > ERROR_RING_CAPACITY {
        ring.pop_front();
    }
}

fn recent(ring: &Mutex<VecDeque<String>>) -> Vec<String> {
    let ring = ring.lock();
    ring.iter()
        .rev()
        .take(crate::constants::ERRORS_DISPLAYED)
        .cloned()
        .collect()
}

/// Point-in-time view rendered by the dashboard.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub server_errors: u64,
    pub throttled: u64,
    pub consistencies: u64,
    pub consistency_failures: u64,
    pub max_successful_rps: u64,
    pub current: CurrentRates,
    pub get_percentiles: (u64, u64, u64),
    pub put_percentiles: (u64, u64, u64),
    pub delete_percentiles: (u64, u64, u64),
    pub consistency_percentiles: (u64, u64, u64),
    pub http_errors: Vec<String>,
    pub other_errors: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreReport {
    pub consistency_rate: f64,
    pub success_rate: f64,
    pub max_successful_rps: u64,
    pub elapsed: Duration,
    pub score: i64,
}

pub struct Aggregator {
    stats: Arc<RollingStats>,
    failure_tx: mpsc::Sender<Outcome>,
    success_tx: mpsc::Sender<Outcome>,
    shutdown_tx: watch::Sender<bool>,
}

impl Aggregator {
    pub fn new(
        stats: Arc<RollingStats>,
        failure_tx: mpsc::Sender<Outcome>,
        success_tx: mpsc::Sender<Outcome>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            stats,
            failure_tx,
            success_tx,
            shutdown_tx,
        }
    }

    /// Spawn the tick-roller and run the merge loop until the result
    /// stream closes or shutdown is signaled; then drain within the grace
    /// period so late outcomes still count.
    pub async fn run(self, mut results: mpsc::Receiver<Outcome>) {
        let roller = self.spawn_roller();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                maybe = results.recv() => match maybe {
                    Some(outcome) => self.absorb(outcome),
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        self.drain(&mut results).await;
                        break;
                    }
                }
            }
        }

        roller.abort();
    }

    fn absorb(&self, outcome: Outcome) {
        self.stats.merge(&outcome);

        // GET 404s are not failures of the server, but they carry signal
        // the oracle needs. The 404 carve-out is scoped to GET: a passing
        // consistency probe also ends on a 404 and belongs with the
        // successes. Both fan-outs are lossy by design: a slow consumer
        // drops feedback rather than stalling aggregation.
        if outcome.was_failure() || (outcome.kind == RequestKind::Get && outcome.was_404()) {
            if self.failure_tx.try_send(outcome).is_err() {
                warn!("failure stream full; feedback dropped");
            }
        } else if self.success_tx.try_send(outcome).is_err() {
            warn!("success stream full; feedback dropped");
        }
    }

    async fn drain(&self, results: &mut mpsc::Receiver<Outcome>) {
        let _ = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(outcome) = results.recv().await {
                self.stats.merge(&outcome);
            }
        })
        .await;
    }

    fn spawn_roller(&self) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(&self.stats);
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(ROLL_POLL_INTERVAL).await;
                stats.roll_if_due(Instant::now());

                if stats.failures() > MAX_FAILURES_BEFORE_EXIT {
                    info!(
                        "{} failures exceeds limit {}; shutting down",
                        stats.failures(),
                        MAX_FAILURES_BEFORE_EXIT
                    );
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn outcome(kind: RequestKind, status: StatusCode, failed: bool) -> Outcome {
        Outcome {
            kind,
            file_name: "f".into(),
            status: Some(status),
            duration: Duration::from_millis(10),
            failed,
            message: "body".into(),
            error: None,
        }
    }

    #[test]
    fn consistency_counts_four_requests() {
        let stats = RollingStats::new(Duration::from_secs(1));
        stats.merge(&outcome(RequestKind::Consistency, StatusCode::NOT_FOUND, false));
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.successes, 4);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.consistencies, 1);
    }

    #[test]
    fn failed_probe_counts_once_in_consistency_failures() {
        let stats = RollingStats::new(Duration::from_secs(1));
        stats.merge(&outcome(RequestKind::Consistency, StatusCode::OK, true));
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.consistency_failures, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.successes, 0);
    }

    #[test]
    fn throttles_are_failures_but_not_server_errors() {
        let stats = RollingStats::new(Duration::from_secs(1));
        stats.merge(&outcome(RequestKind::Put, StatusCode::TOO_MANY_REQUESTS, true));
        let snap = stats.snapshot();
        assert_eq!(snap.throttled, 1);
        assert_eq!(snap.server_errors, 0);
        assert_eq!(snap.failures, 1);
    }

    #[test]
    fn create_rolls_up_into_put_counts() {
        let stats = RollingStats::new(Duration::from_secs(1));
        stats.merge(&outcome(RequestKind::Create, StatusCode::CREATED, false));
        stats.merge(&outcome(RequestKind::Put, StatusCode::CREATED, false));
        stats.roll_if_due(Instant::now() + Duration::from_secs(2));
        let snap = stats.snapshot();
        assert_eq!(snap.current.puts, 2);
    }

    #[test]
    fn window_keeps_last_four_and_averages() {
        let mut w = Window::default();
        for v in [10, 20, 30, 40, 50] {
            w.push(v);
        }
        assert_eq!(w.samples.len(), 4);
        assert_eq!(w.average(), (20 + 30 + 40 + 50) / 4);
    }

    #[test]
    fn roll_tracks_max_successful_rps() {
        let stats = RollingStats::new(Duration::from_millis(10));
        let t0 = Instant::now();
        for _ in 0..8 {
            stats.merge(&outcome(RequestKind::Get, StatusCode::OK, false));
        }
        stats.roll_if_due(t0 + Duration::from_secs(1));
        // Second tick is quieter; the high-water mark must hold.
        stats.merge(&outcome(RequestKind::Get, StatusCode::OK, false));
        stats.roll_if_due(t0 + Duration::from_secs(2));

        let snap = stats.snapshot();
        assert!(snap.max_successful_rps >= snap.current.successful);
        assert_eq!(snap.max_successful_rps, 8);
    }

    #[test]
    fn error_rings_are_bounded_and_recent_first() {
        let stats = RollingStats::new(Duration::from_secs(1));
        for i in 0..(ERROR_RING_CAPACITY + 20) {
            let mut o = outcome(RequestKind::Get, StatusCode::INTERNAL_SERVER_ERROR, true);
            o.message = format!("err-{i}");
            stats.merge(&o);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.http_errors.len(), crate::constants::ERRORS_DISPLAYED);
        assert!(snap.http_errors[0].contains(&format!("err-{}", ERROR_RING_CAPACITY + 19)));
    }

    #[test]
    fn clean_run_scores_with_full_rates() {
        let stats = RollingStats::new(Duration::from_secs(1));
        for _ in 0..10 {
            stats.merge(&outcome(RequestKind::Get, StatusCode::OK, false));
        }
        let report = stats.score();
        assert_eq!(report.consistency_rate, 1.0);
        assert_eq!(report.success_rate, 1.0);
    }

    #[test]
    fn all_failures_scores_zero() {
        let stats = RollingStats::new(Duration::from_secs(1));
        for _ in 0..10 {
            stats.merge(&outcome(RequestKind::Put, StatusCode::TOO_MANY_REQUESTS, true));
        }
        let report = stats.score();
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.score, 0);
    }

    #[test]
    fn empty_run_scores_zero_without_dividing_by_zero() {
        let stats = RollingStats::new(Duration::from_secs(1));
        let report = stats.score();
        assert_eq!(report.score, 0);
        assert_eq!(report.consistency_rate, 1.0);
        assert_eq!(report.success_rate, 1.0);
    }

    #[tokio::test]
    async fn passing_probe_routes_to_successes_and_stays_out_of_error_tables() {
        let stats = Arc::new(RollingStats::new(Duration::from_secs(1)));
        let (failure_tx, mut failure_rx) = mpsc::channel(16);
        let (success_tx, mut success_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        let aggregator = Aggregator::new(Arc::clone(&stats), failure_tx, success_tx, shutdown_tx);

        let mut probe = outcome(RequestKind::Consistency, StatusCode::NOT_FOUND, false);
        probe.message = "consistency probe passed".into();
        aggregator.absorb(probe);

        let routed = success_rx.try_recv().expect("passing probe missed the success stream");
        assert_eq!(routed.kind, RequestKind::Consistency);
        assert!(
            failure_rx.try_recv().is_err(),
            "passing probe leaked onto the failure stream"
        );

        let snap = stats.snapshot();
        assert!(
            snap.http_errors.is_empty(),
            "passing probe polluted the HTTP error table: {:?}",
            snap.http_errors
        );
        assert!(snap.other_errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn aggregator_routes_feedback_and_trips_shutdown() {
        let stats = Arc::new(RollingStats::new(Duration::from_secs(1)));
        let (failure_tx, mut failure_rx) = mpsc::channel(16);
        let (success_tx, mut success_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let (results_tx, results_rx) = mpsc::channel(64);
        let aggregator = Aggregator::new(
            Arc::clone(&stats),
            failure_tx,
            success_tx,
            shutdown_tx,
        );
        let handle = tokio::spawn(aggregator.run(results_rx));

        results_tx
            .send(outcome(RequestKind::Create, StatusCode::CREATED, false))
            .await
            .unwrap();
        results_tx
            .send(outcome(RequestKind::Get, StatusCode::NOT_FOUND, false))
            .await
            .unwrap();

        let success = success_rx.recv().await.unwrap();
        assert_eq!(success.kind, RequestKind::Create);
        let failure = failure_rx.recv().await.unwrap();
        assert!(failure.was_404());

        // Blow past the failure limit and expect the shutdown signal.
        for _ in 0..=MAX_FAILURES_BEFORE_EXIT {
            results_tx
                .send(outcome(RequestKind::Put, StatusCode::TOO_MANY_REQUESTS, true))
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), shutdown_rx.wait_for(|&v| v))
            .await
            .expect("shutdown never signaled")
            .unwrap();

        drop(results_tx);
        handle.await.unwrap();
    }
}
