// src/scheduler.rs
//
// Converts the rate budget into a time-paced stream of requests. Two
// growth laws compose: `growth_factor` adds `seed_growth_amount` once per
// tick, and when the request ramp is enabled `ramp_amount` compounds that
// by a per-minute `ramp_factor`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::constants::{
    CONSISTENCY_REQUEST_WEIGHT, PACING_SLACK, RAMP_INTERVAL, SCHEDULER_IDLE_SLEEP,
};
use crate::oracle::Oracle;
use crate::outcome::{Request, RequestKind};

/// The rate law, kept free of I/O so it can be exercised tick by tick.
#[derive(Debug)]
pub struct RateState {
    base_rate: usize,
    growth_amount: f64,
    ramp_enabled: bool,
    growth_factor: u64,
    ramp_factor: u64,
    ramp_amount: i64,
    last_ramp: Instant,
}

impl RateState {
    pub fn new(base_rate: usize, growth_amount: f64, ramp_enabled: bool) -> Self {
        Self {
            base_rate,
            growth_amount,
            ramp_enabled,
            growth_factor: 0,
            ramp_factor: 1,
            ramp_amount: 0,
            last_ramp: Instant::now(),
        }
    }

    /// Emissions owed in the current tick.
    pub fn target_rate(&self) -> i64 {
        self.base_rate as i64
            + (self.growth_factor as f64 * self.growth_amount) as i64
            + self.ramp_amount
    }

    /// Advance the growth laws at a tick boundary.
    pub fn roll_tick(&mut self, now: Instant) {
        self.growth_factor += 1;
        if self.ramp_enabled {
            if now.duration_since(self.last_ramp) > RAMP_INTERVAL {
                self.ramp_factor += 1;
                self.last_ramp = now;
            }
            self.ramp_amount += (self.growth_amount * self.ramp_factor as f64) as i64;
        }
    }
}

pub struct SchedulerConfig {
    pub tick: std::time::Duration,
    pub max_writes_per_tick: usize,
}

pub struct Scheduler {
    oracle: Arc<Oracle>,
    cfg: SchedulerConfig,
    rate: RateState,
    queue: mpsc::Sender<Request>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        oracle: Arc<Oracle>,
        cfg: SchedulerConfig,
        rate: RateState,
        queue: mpsc::Sender<Request>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            oracle,
            cfg,
            rate,
            queue,
            shutdown,
        }
    }

    /// Emit requests until shutdown. Dropping the queue sender on exit is
    /// what tells the executor no more work is coming.
    pub async fn run(mut self) {
        // Carry between ticks: negative means the previous tick ran ahead.
        let mut scheduled: i64 = 0;
        let mut total_scheduled: u64 = 0;
        let mut tick_deadline = Instant::now() + self.cfg.tick;

        loop {
            let target = self.rate.target_rate();
            let tick_start = Instant::now();
            let mut writes_this_tick = 0usize;

            while scheduled < target {
                let schedule_start = Instant::now();

                let request = self
                    .oracle
                    .next(writes_this_tick < self.cfg.max_writes_per_tick);
                match request.kind {
                    RequestKind::Create | RequestKind::Put => writes_this_tick += 1,
                    // One enqueued task, four HTTP requests.
                    RequestKind::Consistency => {
                        scheduled += CONSISTENCY_REQUEST_WEIGHT - 1
                    }
                    _ => {}
                }
                scheduled += 1;
                total_scheduled += 1;

                if self.queue.send(request).await.is_err() {
                    debug!("request queue closed; scheduler exiting");
                    return;
                }

                // Spread the remaining quota over the remaining tick so
                // emission stays smooth instead of bursting, correcting for
                // however long this iteration took.
                let seeds_left = target - scheduled;
                if seeds_left > 0 {
                    let remaining = self
                        .cfg
                        .tick
                        .checked_sub(tick_start.elapsed())
                        .unwrap_or_default();
                    let pause = (remaining / seeds_left as u32)
                        .checked_sub(schedule_start.elapsed())
                        .and_then(|p| p.checked_sub(PACING_SLACK))
                        .unwrap_or_default();
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
            }

            let now = Instant::now();
            if now > tick_deadline {
                tick_deadline = now + self.cfg.tick;
                // Overshoot carries into the next tick rather than allowing
                // a bursty catch-up.
                scheduled = target - scheduled;
                self.rate.roll_tick(now);

                info!("now scheduling {} req/sec", target);
                info!(
                    "request queue depth: {}",
                    self.queue.max_capacity() - self.queue.capacity()
                );
                debug!("{} scheduled in total", total_scheduled);
            }

            if *self.shutdown.borrow() {
                info!("shutdown signaled; closing request queue");
                break;
            }
            tokio::time::sleep(SCHEDULER_IDLE_SLEEP).await;
        }
    }
}
