// src/oracle.rs
//
// Workload oracle: chooses the next operation from the tracked-file
// population and reconciles that population against observed outcomes.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::distr::weighted::WeightedIndex;
use rand::distr::{Alphanumeric, Distribution};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::constants::{CONSISTENCY_WARMUP, FILE_NAME_LEN};
use crate::fileset::FileSet;
use crate::outcome::{Outcome, Request, RequestKind};

/// Kinds drawn for existing files, heavily favoring reads.
const EXISTING_KINDS: [RequestKind; 3] =
    [RequestKind::Get, RequestKind::Put, RequestKind::Delete];
const EXISTING_WEIGHTS: [u32; 3] = [75, 1, 1];

/// Generate a fresh random file name.
pub fn random_file_name() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(FILE_NAME_LEN)
        .map(char::from)
        .collect()
}

/// Bonus added to the consistency-probe odds: the fuller the tracked
/// population, the likelier a probe. Capped at 8 (probe chance 2%..10%).
fn consistency_bonus(max_file_count: usize, tracked: usize) -> u32 {
    let denom = max_file_count as i64 - tracked as i64 + 1;
    if denom <= 0 {
        return 8;
    }
    ((max_file_count as i64 / denom).min(8)) as u32
}

pub struct Oracle {
    tracked: Arc<RwLock<FileSet>>,
    max_file_count: usize,
    started: Instant,
    existing_chooser: WeightedIndex<u32>,
}

impl Oracle {
    pub fn new(max_file_count: usize) -> Self {
        Self {
            tracked: Arc::new(RwLock::new(FileSet::new())),
            max_file_count,
            started: Instant::now(),
            existing_chooser: WeightedIndex::new(EXISTING_WEIGHTS)
                .expect("static weights are valid"),
        }
    }

    pub fn tracked(&self) -> Arc<RwLock<FileSet>> {
        Arc::clone(&self.tracked)
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.read().len()
    }

    #[cfg(test)]
    pub(crate) fn backdate_start(&mut self, by: std::time::Duration) {
        self.started -= by;
    }

    /// Choose the next request.
    ///
    /// `can_be_write = false` forbids CREATE and PUT: PUT is substituted
    /// with GET, and fresh-file decisions can only yield a consistency
    /// probe. The returned request targets either a fresh random name
    /// (CREATE / CONSISTENCY) or a uniform sample of the tracked set.
    pub fn next(&self, can_be_write: bool) -> Request {
        let tracked_len = self.tracked.read().len();
        let u = if self.max_file_count == 0 {
            0
        } else {
            rand::rng().random_range(0..self.max_file_count)
        };

        // As the population approaches the cap, new-file decisions thin out.
        let fresh = can_be_write && u > tracked_len;

        if !fresh {
            let sampled = self.tracked.read().random().map(str::to_string);
            if let Some(file_name) = sampled {
                let idx = self.existing_chooser.sample(&mut rand::rng());
                let mut kind = EXISTING_KINDS[idx];

                if kind == RequestKind::Delete {
                    // Optimistic: an in-flight DELETE already makes GETs on
                    // this name unpredictable. Failure feedback restores it.
                    self.tracked.write().remove(&file_name);
                }

                if !can_be_write && kind == RequestKind::Put {
                    kind = RequestKind::Get;
                }

                debug!("scheduling {} on {}", kind, file_name);
                return Request { kind, file_name };
            }
            // Nothing tracked yet: fall through to a fresh name.
        }

        let file_name = random_file_name();
        let kind = if self.should_probe(tracked_len) {
            info!("scheduling consistency probe for {}", file_name);
            RequestKind::Consistency
        } else if can_be_write {
            // Tracked only once the success comes back: a GET scheduled
            // right behind a throttled CREATE must not 404 against us.
            RequestKind::Create
        } else {
            // Write-capped with nothing to read: a probe is the only fresh
            // operation left that the cap does not forbid.
            RequestKind::Consistency
        };

        debug!("scheduling {} on {}", kind, file_name);
        Request { kind, file_name }
    }

    fn should_probe(&self, tracked_len: usize) -> bool {
        if self.started.elapsed() < CONSISTENCY_WARMUP {
            return true;
        }
        let bonus = consistency_bonus(self.max_file_count, tracked_len);
        rand::rng().random_range(0..100u32) + bonus >= 98
    }

    /// Consume the failure stream, undoing optimistic bookkeeping and
    /// aligning the tracked set with what the server demonstrably holds.
    pub async fn merge_failures(&self, mut failures: mpsc::Receiver<Outcome>) {
        while let Some(outcome) = failures.recv().await {
            if !outcome.was_failure() && !outcome.was_404() {
                continue;
            }
            let mut tracked = self.tracked.write();
            match outcome.kind {
                RequestKind::Delete => {
                    tracked.add(&outcome.file_name);
                }
                RequestKind::Create => {
                    tracked.remove(&outcome.file_name);
                }
                RequestKind::Get if outcome.was_404() => {
                    tracked.remove(&outcome.file_name);
                }
                RequestKind::Consistency => {
                    tracked.remove(&outcome.file_name);
                }
                _ => {}
            }
        }
    }

    /// Consume the success stream; CREATE successes enter the population.
    pub async fn merge_successes(&self, mut successes: mpsc::Receiver<Outcome>) {
        while let Some(outcome) = successes.recv().await {
            if outcome.kind == RequestKind::Create {
                self.tracked.write().add(&outcome.file_name);
            }
        }
    }
}
