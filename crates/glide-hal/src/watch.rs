//! Latest-value channel between an independent detection producer and the
//! control loop.
//!
//! The producer thread owns a [`SamplePublisher`] and overwrites the current
//! sample at whatever cadence detection runs.  The control loop holds a
//! [`WatchPositionSource`] and only ever sees the newest value; older samples
//! are dropped rather than queued, so a slow consumer never falls behind.
//!
//! ```rust
//! use std::time::Duration;
//! use glide_hal::position::PositionSource;
//! use glide_hal::watch::sample_channel;
//! use glide_types::PositionSample;
//!
//! let (publisher, source) = sample_channel();
//! assert!(source.get_latest().is_none());
//!
//! publisher.publish(PositionSample { x: 1.0, y: 2.0, t: Duration::from_millis(10), confidence: 1.0 });
//! publisher.publish(PositionSample { x: 3.0, y: 2.0, t: Duration::from_millis(20), confidence: 1.0 });
//! assert_eq!(source.get_latest().map(|s| s.x), Some(3.0));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glide_types::PositionSample;
use tokio::sync::watch;

use crate::position::{Detector, PositionSource};

/// Create a connected publisher/source pair.
pub fn sample_channel() -> (SamplePublisher, WatchPositionSource) {
    let (tx, rx) = watch::channel(None);
    (SamplePublisher { tx }, WatchPositionSource { rx })
}

/// Producer half: owned by the detection thread.
#[derive(Debug)]
pub struct SamplePublisher {
    tx: watch::Sender<Option<PositionSample>>,
}

impl SamplePublisher {
    /// Replace the current sample.  Never blocks and never fails, even when
    /// every receiver has been dropped.
    pub fn publish(&self, sample: PositionSample) {
        self.tx.send_replace(Some(sample));
    }

    /// Forget the current sample (e.g. the minimap was lost).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

/// Consumer half: implements [`PositionSource`].
#[derive(Debug, Clone)]
pub struct WatchPositionSource {
    rx: watch::Receiver<Option<PositionSample>>,
}

impl PositionSource for WatchPositionSource {
    fn get_latest(&self) -> Option<PositionSample> {
        *self.rx.borrow()
    }
}

/// [`Detector`] backed by flags the detection thread flips.
#[derive(Debug, Clone)]
pub struct SharedFlags {
    grounded: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl SharedFlags {
    pub fn new() -> Self {
        Self {
            grounded: Arc::new(AtomicBool::new(true)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_grounded(&self, grounded: bool) {
        self.grounded.store(grounded, Ordering::Release);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }
}

impl Default for SharedFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for SharedFlags {
    fn is_grounded(&self) -> bool {
        self.grounded.load(Ordering::Acquire)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(x: f32, ms: u64) -> PositionSample {
        PositionSample {
            x,
            y: 0.0,
            t: Duration::from_millis(ms),
            confidence: 1.0,
        }
    }

    #[test]
    fn source_sees_only_newest_sample() {
        let (publisher, source) = sample_channel();
        publisher.publish(sample(1.0, 10));
        publisher.publish(sample(2.0, 20));
        publisher.publish(sample(3.0, 30));
        let latest = source.get_latest().unwrap();
        assert_eq!(latest.t, Duration::from_millis(30));
    }

    #[test]
    fn clear_resets_to_none() {
        let (publisher, source) = sample_channel();
        publisher.publish(sample(1.0, 10));
        publisher.clear();
        assert!(source.get_latest().is_none());
    }

    #[test]
    fn publisher_on_another_thread() {
        let (publisher, source) = sample_channel();
        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                publisher.publish(sample(i as f32, i * 10));
            }
        });
        handle.join().unwrap();
        assert_eq!(source.get_latest().map(|s| s.x), Some(9.0));
    }

    #[test]
    fn publish_after_source_dropped_does_not_panic() {
        let (publisher, source) = sample_channel();
        drop(source);
        publisher.publish(sample(1.0, 10));
    }

    #[test]
    fn shared_flags_toggle() {
        let flags = SharedFlags::new();
        assert!(flags.is_grounded());
        assert!(flags.is_alive());
        let remote = flags.clone();
        remote.set_grounded(false);
        remote.set_alive(false);
        assert!(!flags.is_grounded());
        assert!(!flags.is_alive());
    }
}
