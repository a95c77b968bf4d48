//! Injected time source.
//!
//! Every timestamp and cooldown comparison in the orchestrator goes
//! through [`Clock`], so control-loop behavior is testable without
//! sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A hand-advanced clock (for testing).
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) {
        self.secs.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.epoch_secs(), 100);
        clock.advance(60);
        assert_eq!(clock.epoch_secs(), 160);
        clock.set(1000);
        assert_eq!(clock.epoch_secs(), 1000);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.epoch_secs() > 0);
    }
}
