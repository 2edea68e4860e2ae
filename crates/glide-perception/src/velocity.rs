//! Velocity estimation from a latent, quantized position stream.
//!
//! Each accepted [`PositionSample`] contributes an instantaneous velocity
//! `Δposition / Δt` that is blended into a per-axis exponential moving
//! average:
//!
//! ```text
//! w  = alpha * min(1, expected_interval / actual_interval)
//! v' = v + w * (v_inst - v)
//! ```
//!
//! Samples that arrive late (a dropped frame, a detection hiccup) therefore
//! pull the estimate less than on-time ones, so frame-drop spikes cannot
//! corrupt it.  Samples that are not strictly newer than the last accepted
//! one are rejected outright.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use glide_perception::velocity::{VelocityConfig, VelocityEstimator};
//! use glide_types::PositionSample;
//!
//! let mut est = VelocityEstimator::new(VelocityConfig::default());
//! for i in 0..20u64 {
//!     let t = Duration::from_millis(i * 33);
//!     est.ingest(PositionSample { x: i as f32 * 3.3, y: 50.0, t, confidence: 1.0 });
//! }
//! let v = est.get(Duration::from_millis(19 * 33));
//! assert!((v.vx - 100.0).abs() < 1.0);
//! assert!(!v.stale);
//! ```

use std::time::Duration;

use glide_types::PositionSample;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for [`VelocityEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Nominal interval between detection samples, in milliseconds.
    pub expected_interval_ms: u64,
    /// EMA weight for an on-time sample, in `(0, 1]`.
    pub alpha: f32,
    /// The estimate is stale once no sample arrived for this many expected
    /// intervals.
    pub stale_factor: f32,
    /// After this many expected intervals without a sample the estimate is
    /// reset to zero and reported as unknown.
    pub max_stale_periods: u32,
    /// Number of accepted samples before the estimate loses its
    /// low-confidence marker.
    pub confident_after: u32,
}

impl VelocityConfig {
    pub fn expected_interval(&self) -> Duration {
        Duration::from_millis(self.expected_interval_ms.max(1))
    }
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            expected_interval_ms: 33,
            alpha: 0.5,
            stale_factor: 3.0,
            max_stale_periods: 10,
            confident_after: 3,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// Smoothed velocity plus its trust markers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityEstimate {
    /// Horizontal velocity (px/s).
    pub vx: f32,
    /// Vertical velocity (px/s).
    pub vy: f32,
    /// Capture time of the last sample folded into the estimate.
    pub t_updated: Duration,
    /// No sample has been accepted within `stale_factor` intervals.
    pub stale: bool,
    /// The estimate was reset after too many stale periods (or nothing has
    /// been seen yet).  Predictive stopping must not be used.
    pub unknown: bool,
    /// Too few samples since the filter was seeded.
    pub low_confidence: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// VelocityEstimator
// ────────────────────────────────────────────────────────────────────────────

/// Per-axis EMA velocity filter.
#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    config: VelocityConfig,
    vx: f32,
    vy: f32,
    /// Baseline for the next instantaneous velocity.  Cleared on reset.
    seed: Option<PositionSample>,
    /// Capture time of the newest accepted sample; survives resets so that
    /// ordering is enforced across them.
    newest: Option<Duration>,
    last_received: Option<Duration>,
    accepted: u32,
    unknown: bool,
}

impl VelocityEstimator {
    pub fn new(config: VelocityConfig) -> Self {
        Self {
            config,
            vx: 0.0,
            vy: 0.0,
            seed: None,
            newest: None,
            last_received: None,
            accepted: 0,
            unknown: true,
        }
    }

    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// Ingest a sample, treating its capture time as its arrival time.
    pub fn ingest(&mut self, sample: PositionSample) -> bool {
        self.ingest_at(sample, sample.t)
    }

    /// Ingest a sample that reached the control loop at `received_at`.
    ///
    /// Returns `false` (and leaves the estimate untouched) when the sample is
    /// not strictly newer than the last accepted one.
    pub fn ingest_at(&mut self, sample: PositionSample, received_at: Duration) -> bool {
        if self.newest.is_some_and(|t| sample.t <= t) {
            return false;
        }

        match self.seed {
            None => {
                self.vx = 0.0;
                self.vy = 0.0;
                self.accepted = 1;
            }
            Some(prev) => {
                let dt = (sample.t - prev.t).as_secs_f32();
                let inst_x = (sample.x - prev.x) / dt;
                let inst_y = (sample.y - prev.y) / dt;
                let expected = self.config.expected_interval().as_secs_f32();
                let weight = self.config.alpha * (expected / dt).min(1.0);
                self.vx += weight * (inst_x - self.vx);
                self.vy += weight * (inst_y - self.vy);
                self.accepted = self.accepted.saturating_add(1);
            }
        }

        self.seed = Some(sample);
        self.newest = Some(sample.t);
        self.last_received = Some(received_at);
        self.unknown = false;
        true
    }

    /// Current estimate as of `now` (same time base as `received_at`).
    ///
    /// Resets the filter when no sample arrived for `max_stale_periods`
    /// expected intervals.
    pub fn get(&mut self, now: Duration) -> VelocityEstimate {
        let interval = self.config.expected_interval();
        let since = self
            .last_received
            .map_or(Duration::MAX, |t| now.saturating_sub(t));
        let stale = since.as_secs_f32() > interval.as_secs_f32() * self.config.stale_factor;

        if !self.unknown && since > interval * self.config.max_stale_periods {
            warn!(
                silent_ms = since.as_millis() as u64,
                "velocity estimate reset after prolonged sample outage"
            );
            self.reset();
        }

        VelocityEstimate {
            vx: self.vx,
            vy: self.vy,
            t_updated: self.newest.unwrap_or_default(),
            stale,
            unknown: self.unknown,
            low_confidence: self.accepted < self.config.confident_after,
        }
    }

    /// Zero the estimate and mark it unknown.  Sample ordering is still
    /// enforced against the newest sample seen before the reset.
    pub fn reset(&mut self) {
        debug!("velocity estimator reset");
        self.vx = 0.0;
        self.vy = 0.0;
        self.seed = None;
        self.accepted = 0;
        self.unknown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, ms: u64) -> PositionSample {
        PositionSample {
            x,
            y: 10.0,
            t: Duration::from_millis(ms),
            confidence: 1.0,
        }
    }

    fn cfg() -> VelocityConfig {
        VelocityConfig {
            expected_interval_ms: 20,
            ..VelocityConfig::default()
        }
    }

    #[test]
    fn first_sample_is_zero_with_low_confidence() {
        let mut est = VelocityEstimator::new(cfg());
        assert!(est.ingest(sample(5.0, 0)));
        let v = est.get(Duration::ZERO);
        assert_eq!(v.vx, 0.0);
        assert!(v.low_confidence);
        assert!(!v.unknown);
    }

    #[test]
    fn nothing_seen_is_unknown_and_stale() {
        let mut est = VelocityEstimator::new(cfg());
        let v = est.get(Duration::from_millis(5));
        assert!(v.unknown);
        assert!(v.stale);
    }

    #[test]
    fn converges_to_constant_velocity() {
        let mut est = VelocityEstimator::new(cfg());
        for i in 0..30 {
            est.ingest(sample(i as f32 * 2.0, i * 20));
        }
        let v = est.get(Duration::from_millis(29 * 20));
        assert!((v.vx - 100.0).abs() < 0.01);
        assert!(v.vy.abs() < 1e-6);
        assert!(!v.low_confidence);
    }

    #[test]
    fn rejects_out_of_order_and_duplicate_samples() {
        let mut est = VelocityEstimator::new(cfg());
        assert!(est.ingest(sample(0.0, 100)));
        assert!(est.ingest(sample(2.0, 120)));
        let before = est.get(Duration::from_millis(120));

        assert!(!est.ingest(sample(50.0, 120)));
        assert!(!est.ingest(sample(-50.0, 60)));
        let after = est.get(Duration::from_millis(120));
        assert_eq!(before, after);
    }

    #[test]
    fn delayed_sample_is_down_weighted() {
        // Same displacement rate, but one arrives on time and the other after
        // a 4x gap: the late one must move the estimate less.
        let mut on_time = VelocityEstimator::new(cfg());
        on_time.ingest(sample(0.0, 0));
        on_time.ingest(sample(2.0, 20));

        let mut late = VelocityEstimator::new(cfg());
        late.ingest(sample(0.0, 0));
        late.ingest(sample(8.0, 80));

        let a = on_time.get(Duration::from_millis(20)).vx;
        let b = late.get(Duration::from_millis(80)).vx;
        assert!((a - 50.0).abs() < 1e-3); // 0.5 * 100
        assert!((b - 12.5).abs() < 1e-3); // 0.5 * 0.25 * 100
    }

    #[test]
    fn frame_drop_spike_is_damped() {
        let mut est = VelocityEstimator::new(cfg());
        for i in 0..20 {
            est.ingest(sample(i as f32 * 2.0, i * 20));
        }
        // A jump of 40 px after a 200 ms outage would read as 200 px/s.
        est.ingest(sample(38.0 + 40.0, 19 * 20 + 200));
        let v = est.get(Duration::from_millis(19 * 20 + 200));
        assert!(v.vx < 110.0, "spike leaked into estimate: {}", v.vx);
    }

    #[test]
    fn staleness_then_reset_to_unknown() {
        let mut est = VelocityEstimator::new(cfg());
        for i in 0..10 {
            est.ingest(sample(i as f32 * 2.0, i * 20));
        }
        let last = Duration::from_millis(180);

        let fresh = est.get(last + Duration::from_millis(20));
        assert!(!fresh.stale);

        let stale = est.get(last + Duration::from_millis(100));
        assert!(stale.stale);
        assert!(!stale.unknown);
        assert!(stale.vx > 50.0);

        let gone = est.get(last + Duration::from_millis(300));
        assert!(gone.unknown);
        assert_eq!(gone.vx, 0.0);
    }

    #[test]
    fn sample_after_reset_reseeds_but_keeps_ordering() {
        let mut est = VelocityEstimator::new(cfg());
        est.ingest(sample(0.0, 0));
        est.ingest(sample(2.0, 20));
        est.reset();
        assert!(!est.ingest(sample(9.0, 20)));
        assert!(est.ingest(sample(100.0, 500)));
        let v = est.get(Duration::from_millis(500));
        assert_eq!(v.vx, 0.0);
        assert!(!v.unknown);
        assert!(v.low_confidence);
    }

    #[test]
    fn identical_replay_yields_identical_estimate() {
        let stream: Vec<PositionSample> = (0..50)
            .map(|i| sample(((i * 7) % 13) as f32 + i as f32, i * 20 + (i % 3) * 5))
            .collect();
        let run = || {
            let mut est = VelocityEstimator::new(cfg());
            for s in &stream {
                est.ingest(*s);
            }
            est.get(Duration::from_millis(1000))
        };
        assert_eq!(run(), run());
    }
}
