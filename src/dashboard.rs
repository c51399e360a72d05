// src/dashboard.rs
//
// Live terminal view: a metrics table and the most recent errors,
// repainted once a second, plus the final score block.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::watch;

use crate::constants::DASHBOARD_INTERVAL;
use crate::stats::{RollingStats, ScoreReport, StatsSnapshot};

/// Clear the terminal and repaint both tables.
pub fn render(snapshot: &StatsSnapshot) {
    let mut out = std::io::stdout().lock();
    // Clear screen, home cursor.
    let _ = write!(out, "\x1b[2J\x1b[H");
    let _ = writeln!(out, "{}", format_metrics(snapshot));
    let _ = writeln!(out, "{}", format_errors(snapshot));
    let _ = out.flush();
}

fn format_metrics(s: &StatsSnapshot) -> String {
    let mut t = String::new();
    row(&mut t, "Metric", "Count", "");
    row(&mut t, "------", "-----", "");
    row(&mut t, "Elapsed (s)", &s.elapsed.as_secs().to_string(), "");
    row(&mut t, "# Requests", &s.requests.to_string(), "");
    row(&mut t, "# Successes", &s.successes.to_string(), "");
    row(&mut t, "# Failures", &s.failures.to_string(), "");
    row(
        &mut t,
        "# Consistency Passed",
        &(s.consistencies - s.consistency_failures).to_string(),
        "",
    );
    row(
        &mut t,
        "# Consistency Failed",
        &s.consistency_failures.to_string(),
        "",
    );
    row(&mut t, "# 5XX Errors", &s.server_errors.to_string(), "");
    row(&mut t, "# Throttled", &s.throttled.to_string(), "");
    row(
        &mut t,
        "Current THROTTLE/sec",
        &s.current.throttled.to_string(),
        "",
    );
    row(&mut t, "Current GET/sec", &s.current.gets.to_string(), "");
    row(&mut t, "Current PUT/sec", &s.current.puts.to_string(), "");
    row(
        &mut t,
        "Current DELETE/sec",
        &s.current.deletes.to_string(),
        "",
    );
    row(
        &mut t,
        "Current CONSISTENCY/sec",
        &s.current.consistencies.to_string(),
        "(4 requests per probe)",
    );
    row(&mut t, "Current req/sec", &s.current.total.to_string(), "");
    row(
        &mut t,
        "Current successful req/sec",
        &s.current.successful.to_string(),
        "",
    );
    row(
        &mut t,
        "Max successful req/sec",
        &s.max_successful_rps.to_string(),
        "",
    );
    t.push('\n');
    t.push_str("Latency (ms)                 tick mean    p50      p95      p99\n");
    latency_row(&mut t, "GET", s.current.get_latency_us, s.get_percentiles);
    latency_row(&mut t, "PUT", s.current.put_latency_us, s.put_percentiles);
    latency_row(
        &mut t,
        "DELETE",
        s.current.delete_latency_us,
        s.delete_percentiles,
    );
    latency_row(
        &mut t,
        "CONSISTENCY",
        s.current.consistency_latency_us,
        s.consistency_percentiles,
    );
    t
}

fn row(out: &mut String, metric: &str, count: &str, note: &str) {
    out.push_str(&format!("{metric:<28} {count:>10}  {note}\n"));
}

fn latency_row(out: &mut String, kind: &str, tick_mean_us: u64, p: (u64, u64, u64)) {
    out.push_str(&format!(
        "{kind:<28} {:>9.1} {:>8.1} {:>8.1} {:>8.1}\n",
        tick_mean_us as f64 / 1000.0,
        p.0 as f64 / 1000.0,
        p.1 as f64 / 1000.0,
        p.2 as f64 / 1000.0,
    ));
}

fn format_errors(s: &StatsSnapshot) -> String {
    let mut t = String::new();
    t.push_str("HTTP errors:\n");
    t.push_str("---------------------------------------------\n");
    for e in &s.http_errors {
        t.push_str(&truncated(e));
        t.push('\n');
    }
    t.push('\n');
    t.push_str("Other errors:\n");
    t.push_str("---------------------------------------------\n");
    for e in &s.other_errors {
        t.push_str(&truncated(e));
        t.push('\n');
    }
    t
}

fn truncated(line: &str) -> String {
    const MAX: usize = 160;
    if line.len() <= MAX {
        line.to_string()
    } else {
        let cut = line
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX);
        format!("{}...", &line[..cut])
    }
}

/// Print the end-of-run summary.
pub fn print_score(report: &ScoreReport) {
    println!();
    println!(
        "Consistency accuracy: {:.2}%",
        report.consistency_rate * 100.0
    );
    println!("Success rate:         {:.2}%", report.success_rate * 100.0);
    println!(
        "Max successful req/sec: {}",
        report.max_successful_rps
    );
    println!(
        "Run length:           {} seconds",
        report.elapsed.as_secs()
    );
    println!("Total score:          {}", report.score);
}

/// Repaint until shutdown.
pub fn spawn(
    stats: Arc<RollingStats>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DASHBOARD_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => render(&stats.snapshot()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
