// -----------------------------------------------------------------------------
// fsload - adaptive load generator for the throttled file server
// -----------------------------------------------------------------------------

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::{mpsc, watch};
use tracing::info;

use fsload::client::FileServerClient;
use fsload::config::Config;
use fsload::constants::{
    FEEDBACK_STREAM_CAPACITY, REQUEST_QUEUE_CAPACITY, RESULT_STREAM_CAPACITY,
};
use fsload::dashboard;
use fsload::executor::Executor;
use fsload::oracle::Oracle;
use fsload::payload::{spawn_size_ramp, FileSizeState};
use fsload::scheduler::{RateState, Scheduler, SchedulerConfig};
use fsload::stats::{Aggregator, RollingStats};

#[derive(Parser, Debug)]
#[command(name = "fsload", version, about = "Adaptive load generator for the throttled file server")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let cfg = Config::from_env();

    init_logging(cli.verbose, &cfg.log_file)?;
    info!(
        "starting load generator against {}://{}:{}/{}",
        cfg.endpoint.proto, cfg.endpoint.host, cfg.endpoint.port, cfg.endpoint.path_prefix
    );
    info!("{cfg:?}");

    run(cfg).await
}

/// The screen belongs to the dashboard, so everything else goes to a file.
/// A log file we cannot create is fatal: the run would be flying blind.
fn init_logging(verbose: u8, log_file: &str) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("cannot create log file at {log_file}"))?;

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::new(format!("fsload={level}"));
    fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let (result_tx, result_rx) = mpsc::channel(RESULT_STREAM_CAPACITY);
    let (failure_tx, failure_rx) = mpsc::channel(FEEDBACK_STREAM_CAPACITY);
    let (success_tx, success_rx) = mpsc::channel(FEEDBACK_STREAM_CAPACITY);

    let oracle = Arc::new(Oracle::new(cfg.max_file_count));
    let sizes = Arc::new(FileSizeState::new(cfg.max_file_size, cfg.upload_huge_files));
    let client = FileServerClient::new(cfg.endpoint.clone())?;
    let stats = Arc::new(RollingStats::new(cfg.tick));

    info!("starting oracle feedback loops");
    let failure_oracle = Arc::clone(&oracle);
    tokio::spawn(async move { failure_oracle.merge_failures(failure_rx).await });
    let success_oracle = Arc::clone(&oracle);
    tokio::spawn(async move { success_oracle.merge_successes(success_rx).await });

    info!("starting scheduler");
    let scheduler = Scheduler::new(
        Arc::clone(&oracle),
        SchedulerConfig {
            tick: cfg.tick,
            max_writes_per_tick: cfg.max_writes_per_tick,
        },
        RateState::new(
            cfg.requests_per_second,
            cfg.seed_growth_amount,
            cfg.enable_request_ramp,
        ),
        request_tx,
        shutdown_rx.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    info!("starting executor");
    let executor = Executor::new(client, Arc::clone(&sizes), result_tx);
    let executor_handle = tokio::spawn(executor.run(request_rx));

    if cfg.enable_file_ramp {
        info!("file size ramp enabled");
        spawn_size_ramp(Arc::clone(&sizes), shutdown_rx.clone());
    }

    let dashboard_handle = dashboard::spawn(Arc::clone(&stats), shutdown_rx.clone());

    info!("starting aggregator");
    let aggregator = Aggregator::new(
        Arc::clone(&stats),
        failure_tx,
        success_tx,
        shutdown_tx.clone(),
    );
    let aggregator_handle = tokio::spawn(aggregator.run(result_rx));

    let signal_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        let sig = wait_for_shutdown_signal().await;
        info!("received {sig}; initiating ordered shutdown");
        let _ = signal_shutdown.send(true);
    });

    // The aggregator is the last stage standing: it exits once shutdown has
    // been signaled (by the user or by its own failure limit) and the
    // result stream has drained.
    let _ = aggregator_handle.await;
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    let _ = executor_handle.await;
    let _ = dashboard_handle.await;

    dashboard::render(&stats.snapshot());
    dashboard::print_score(&stats.score());
    info!("run complete");
    Ok(())
}

async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}
