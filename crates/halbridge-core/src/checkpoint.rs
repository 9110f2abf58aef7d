//! Periodic brain checkpoints.

use tracing::debug;

/// Sends between checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u32 = 30;

/// Counts outbound messages and decides when to issue the save command.
///
/// A checkpoint is only taken while no response is outstanding: the save
/// command's own output would otherwise be paired with a pending request.
/// When busy the counter stays above the threshold and the check repeats on
/// every following send.
#[derive(Debug, Clone)]
pub struct CheckpointScheduler {
    threshold: u32,
    counter: u32,
    checkpoints: u64,
}

impl Default for CheckpointScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_INTERVAL)
    }
}

impl CheckpointScheduler {
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counter: 0,
            checkpoints: 0,
        }
    }

    /// Record an accepted send. Returns `true` when the caller must send the
    /// save command now.
    pub fn on_send(&mut self, pending_empty: bool) -> bool {
        self.counter = self.counter.saturating_add(1);
        if self.counter <= self.threshold {
            return false;
        }
        if !pending_empty {
            debug!(counter = self.counter, "Checkpoint deferred, responses outstanding");
            return false;
        }
        self.counter = 0;
        self.checkpoints += 1;
        true
    }

    /// Sends since the last checkpoint.
    pub const fn counter(&self) -> u32 {
        self.counter
    }

    /// Checkpoints triggered so far.
    pub const fn checkpoints(&self) -> u64 {
        self.checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_after_threshold_when_idle() {
        let mut scheduler = CheckpointScheduler::default();
        let fired = (0..31).filter(|_| scheduler.on_send(true)).count();
        assert_eq!(fired, 1);
        assert_eq!(scheduler.counter(), 0);
        assert_eq!(scheduler.checkpoints(), 1);
    }

    #[test]
    fn thirtieth_send_does_not_checkpoint() {
        let mut scheduler = CheckpointScheduler::default();
        assert!((0..30).all(|_| !scheduler.on_send(true)));
        assert_eq!(scheduler.counter(), 30);
    }

    #[test]
    fn busy_queue_defers_checkpoint() {
        let mut scheduler = CheckpointScheduler::default();
        for _ in 0..30 {
            scheduler.on_send(true);
        }
        assert!(!scheduler.on_send(false));
        assert!(!scheduler.on_send(false));
        assert_eq!(scheduler.counter(), 32);
        assert_eq!(scheduler.checkpoints(), 0);

        assert!(scheduler.on_send(true));
        assert_eq!(scheduler.counter(), 0);
    }
}
