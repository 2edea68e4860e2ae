//! [`StallGuard`] – detects a held direction key that produces no motion.
//!
//! The guard keeps a rolling window of the last *N* observed positions along
//! one axis.  Once the window is full and every entry lies within
//! `tolerance` of the others, [`StallGuard::record`] returns `true`: the agent
//! is pushing against something (a wall, a lost focus window, a stuck key)
//! and the caller should stop instead of holding the key until its timeout.
//!
//! # Example
//!
//! ```rust
//! use glide_runtime::loop_guard::StallGuard;
//!
//! let mut guard = StallGuard::new(3, 0.5);
//!
//! assert!(!guard.record(10.0));
//! assert!(!guard.record(10.2));
//! assert!(guard.record(10.1)); // three readings within 0.5 px → stalled
//!
//! guard.reset();
//! assert!(!guard.record(10.1));
//! ```

use std::collections::VecDeque;

// ─────────────────────────────────────────────────────────────────────────────
// StallGuard
// ─────────────────────────────────────────────────────────────────────────────

pub struct StallGuard {
    /// Number of consecutive readings that must agree.
    window: usize,
    tolerance: f32,
    history: VecDeque<f32>,
}

impl StallGuard {
    /// `window` of 0 disables detection.
    pub fn new(window: usize, tolerance: f32) -> Self {
        Self {
            window,
            tolerance,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Record the latest reading.  Returns `true` while stalled.
    pub fn record(&mut self, value: f32) -> bool {
        self.history.push_back(value);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        self.is_stalled()
    }

    pub fn is_stalled(&self) -> bool {
        if self.window == 0 || self.history.len() < self.window {
            return false;
        }
        let (lo, hi) = self
            .history
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        hi - lo <= self.tolerance
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_motion_is_not_a_stall() {
        let mut guard = StallGuard::new(3, 0.5);
        for i in 0..10 {
            assert!(!guard.record(i as f32));
        }
    }

    #[test]
    fn detects_stall_at_window() {
        let mut guard = StallGuard::new(3, 0.5);
        assert!(!guard.record(42.0));
        assert!(!guard.record(42.0));
        assert!(guard.record(42.0));
        assert!(guard.record(42.3));
    }

    #[test]
    fn movement_breaks_the_stall() {
        let mut guard = StallGuard::new(3, 0.5);
        guard.record(5.0);
        guard.record(5.0);
        assert!(guard.record(5.0));
        assert!(!guard.record(7.0));
    }

    #[test]
    fn zero_window_never_triggers() {
        let mut guard = StallGuard::new(0, 0.5);
        for _ in 0..5 {
            assert!(!guard.record(1.0));
        }
    }

    #[test]
    fn reset_clears_history() {
        let mut guard = StallGuard::new(2, 0.1);
        guard.record(1.0);
        assert!(guard.record(1.0));
        guard.reset();
        assert!(!guard.record(1.0));
    }
}
