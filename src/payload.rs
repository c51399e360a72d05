// src/payload.rs
//
// Payload sizing and body generation. Sizes skew toward small files while
// leaving room for growth; an optional background task ramps the upper
// bound over the life of a run.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::Rng;
use tracing::info;

use crate::constants::{
    FILE_RAMP_INTERVAL, HUGE_FILE_ODDS, HUGE_FILE_SIZE, LARGE_SIZE_KEEP_PROBABILITY,
};

/// Upper bound for drawn payload sizes. Monotonically non-decreasing over a
/// run; written only by the ramp task.
#[derive(Debug)]
pub struct FileSizeState {
    max_file_size: RwLock<u64>,
    /// Mix the occasional fixed-size huge upload into the draw.
    upload_huge_files: bool,
}

impl FileSizeState {
    pub fn new(max_file_size: u64, upload_huge_files: bool) -> Self {
        Self {
            max_file_size: RwLock::new(max_file_size.max(1)),
            upload_huge_files,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        *self.max_file_size.read()
    }

    fn grow(&self) {
        let mut max = self.max_file_size.write();
        *max = (*max).saturating_mul(3) / 2;
        info!("max file size grown to {} bytes", *max);
    }

    /// Draw a payload size in `[1, max_file_size]`.
    ///
    /// Draws landing in the upper half of the range are kept only one time
    /// in five and halved otherwise, so the population skews small while
    /// still exercising the full range. When huge uploads are enabled, one
    /// draw in a hundred is overridden with the fixed huge size.
    pub fn draw_size(&self) -> u64 {
        let max = self.max_file_size();
        let mut rng = rand::rng();

        let mut size = rng.random_range(1..=max);
        if size > max / 2 && rng.random::<f64>() >= LARGE_SIZE_KEEP_PROBABILITY {
            size = (size / 2).max(1);
        }

        if self.upload_huge_files && rng.random_range(0..HUGE_FILE_ODDS) == 0 {
            size = HUGE_FILE_SIZE;
        }

        size
    }
}

/// Generate `size` cryptographically random bytes, Base64-encoded. The
/// encoding is the request body the server stores and what consistency
/// probes compare byte-for-byte.
pub fn random_body(size: u64) -> String {
    let mut bytes = vec![0u8; size as usize];
    rand::rng().fill(&mut bytes[..]);
    BASE64.encode(&bytes)
}

/// Spawn the size-ramp task: multiply `max_file_size` by 1.5 every 15
/// seconds until shutdown.
pub fn spawn_size_ramp(
    sizes: Arc<FileSizeState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FILE_RAMP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; swallow the first tick
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sizes.grow(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
