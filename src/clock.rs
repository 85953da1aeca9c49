//! Monotonic frame pacing clock.
//!
//! The player paces packet emission off wall-clock elapsed time since the
//! previous send rather than a fixed `sleep(20ms)`, so per-packet jitter
//! does not accumulate into cumulative drift over a long playback. Modeled
//! on the `Instant`-based interval tracking in the teacher's heartbeat
//! handler, generalized from "time since last heartbeat" to "time until
//! next frame".

use std::time::{Duration, Instant};

/// The fixed cadence of one Opus frame: 20 ms.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Tracks the next scheduled send time for a 20 ms cadence.
pub struct FrameClock {
    next_tick: Instant,
}

impl FrameClock {
    /// Start a new clock; the first `wait` call returns immediately since
    /// there is no prior send to pace from.
    pub fn new() -> Self {
        Self {
            next_tick: Instant::now(),
        }
    }

    /// Sleep until the next frame boundary, then advance the schedule by
    /// one interval. If the caller is already behind schedule (e.g. a slow
    /// encode), this returns immediately and re-synchronizes from now,
    /// rather than bursting queued sends to catch up.
    pub async fn wait(&mut self) {
        let now = Instant::now();
        if self.next_tick > now {
            tokio::time::sleep(self.next_tick - now).await;
            self.next_tick += FRAME_INTERVAL;
        } else {
            // Fell behind by more than one frame; resync instead of bursting.
            self.next_tick = now + FRAME_INTERVAL;
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_paces_within_slop() {
        let mut clock = FrameClock::new();
        let start = Instant::now();

        for _ in 0..5 {
            clock.wait().await;
        }

        let elapsed = start.elapsed();
        // 5 ticks at 20ms should land close to 100ms, well within the
        // permissible ±5ms-per-packet slop accumulated over 5 packets.
        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed <= Duration::from_millis(150));
    }
}
