//! Seams to the detection pipeline: positions, boolean state signals, and
//! the clock every timed primitive suspends on.

use std::time::{Duration, Instant};

use glide_types::PositionSample;

/// Latest-position feed produced by the detection collaborator.
///
/// The producer runs at its own cadence; callers poll without blocking.
pub trait PositionSource: Send + Sync {
    /// Return the most recent sample, or `None` if nothing has been detected
    /// yet.  Must never block.
    fn get_latest(&self) -> Option<PositionSample>;
}

/// Boolean state signals from the detection collaborator.
pub trait Detector: Send + Sync {
    /// `true` when the agent stands on stable footing.
    fn is_grounded(&self) -> bool;

    /// `true` while the agent is alive.
    fn is_alive(&self) -> bool;
}

/// Monotonic time plus suspension.
///
/// Control loops never call `std::thread::sleep` directly so that a
/// simulated clock can drive them deterministically.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Option<PositionSample>);

    impl PositionSource for FixedSource {
        fn get_latest(&self) -> Option<PositionSample> {
            self.0
        }
    }

    #[test]
    fn empty_source_returns_none() {
        let src = FixedSource(None);
        assert!(src.get_latest().is_none());
    }

    #[test]
    fn source_returns_latest_sample() {
        let sample = PositionSample {
            x: 12.0,
            y: 40.0,
            t: Duration::from_millis(33),
            confidence: 0.9,
        };
        let src: Box<dyn PositionSource> = Box::new(FixedSource(Some(sample)));
        assert_eq!(src.get_latest(), Some(sample));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() >= a + Duration::from_millis(2));
    }
}
