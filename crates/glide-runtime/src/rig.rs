//! [`Rig`] – everything a control loop needs to sense and act.
//!
//! A rig bundles the detection collaborator ([`PositionSource`],
//! [`Detector`]), the [`Clock`], the [`KeyArbiter`], the velocity estimator
//! and the calibration context of one movement subsystem instance.  The
//! control loops borrow it mutably for the duration of a run; calibration
//! therefore has exactly one writer.
//!
//! Every suspension goes through [`Rig::sleep`] or [`Rig::wait_until`], both
//! bounded and both checking the [`CancelToken`].  On cancellation the rig
//! releases every held key before returning [`MoveError::Cancelled`].
//!
//! # Example
//!
//! ```rust
//! use glide_hal::sim::{SimConfig, SimWorld};
//! use glide_runtime::rig::{Rig, RigConfig};
//! use glide_types::Point;
//!
//! let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
//! let mut rig = Rig::simulated(&world, RigConfig::default());
//! let obs = rig.observe().unwrap();
//! assert_eq!(obs.position, Point::new(50.0, 100.0));
//! assert!(obs.grounded);
//! ```

use std::sync::Arc;
use std::time::Duration;

use glide_hal::{Clock, Detector, KeyActuator, PositionSource, SimWorld};
use glide_kernel::{CancelToken, KeyArbiter, Owner};
use glide_perception::{
    CalibrationContext, DecelerationConfig, VelocityConfig, VelocityEstimate, VelocityEstimator,
};
use glide_types::{Key, KeyBindings, MoveError, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Sensing and timing parameters shared by every loop driving one rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub bindings: KeyBindings,
    /// Polling period of every wait loop.
    pub poll_interval_ms: u64,
    /// Samples older than this are stale; also bounds the wait for a fresh
    /// one.
    pub sensor_timeout_ms: u64,
    /// Minimum capture-time gap between a key release and the sample used
    /// as the settled position.
    pub settle_ms: u64,
    /// Upper bound on waiting for the agent to land after leaving a platform.
    pub landing_timeout_ms: u64,
    /// Polls without motion while a direction key is held before the walk
    /// is declared stalled.  0 disables stall detection.
    pub stall_polls: usize,
    pub stall_tolerance: f32,
    pub velocity: VelocityConfig,
    pub deceleration: DecelerationConfig,
}

impl RigConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn landing_timeout(&self) -> Duration {
        Duration::from_millis(self.landing_timeout_ms)
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            bindings: KeyBindings::default(),
            poll_interval_ms: 10,
            sensor_timeout_ms: 500,
            settle_ms: 150,
            landing_timeout_ms: 2000,
            stall_polls: 25,
            stall_tolerance: 0.5,
            velocity: VelocityConfig::default(),
            deceleration: DecelerationConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

/// One sensing pass: the newest sample plus everything derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: Point,
    /// Capture time of the sample behind `position`.
    pub sample_t: Duration,
    /// Clock time of the sensing pass.
    pub now: Duration,
    pub velocity: VelocityEstimate,
    pub grounded: bool,
    pub alive: bool,
}

impl Observation {
    /// Age of the position at the time it was read.
    pub fn latency(&self) -> Duration {
        self.now.saturating_sub(self.sample_t)
    }

    /// Whether predictive stopping may trust the velocity.
    pub fn velocity_usable(&self) -> bool {
        !self.velocity.unknown && !self.velocity.stale
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rig
// ─────────────────────────────────────────────────────────────────────────────

pub struct Rig {
    source: Arc<dyn PositionSource>,
    detector: Arc<dyn Detector>,
    clock: Arc<dyn Clock>,
    keys: KeyArbiter,
    cancel: CancelToken,
    velocity: VelocityEstimator,
    calibration: CalibrationContext,
    last_position: Option<Point>,
    config: RigConfig,
}

impl Rig {
    pub fn new(
        source: Arc<dyn PositionSource>,
        detector: Arc<dyn Detector>,
        clock: Arc<dyn Clock>,
        actuator: impl KeyActuator + 'static,
        config: RigConfig,
    ) -> Self {
        Self {
            source,
            detector,
            clock,
            keys: KeyArbiter::new(actuator),
            cancel: CancelToken::new(),
            velocity: VelocityEstimator::new(config.velocity),
            calibration: CalibrationContext::new(config.deceleration),
            last_position: None,
            config,
        }
    }

    /// Rig wired to every seam of a [`SimWorld`].  The velocity estimator's
    /// expected interval is taken from the world's sampling rate.
    pub fn simulated(world: &SimWorld, mut config: RigConfig) -> Self {
        config.velocity.expected_interval_ms = world.config().sample_interval.as_millis() as u64;
        config.bindings = world.config().bindings;
        Self::new(
            Arc::new(world.clone()),
            Arc::new(world.clone()),
            Arc::new(world.clone()),
            world.clone(),
            config,
        )
    }

    /// Replace the cancellation token, e.g. with one shared with a Ctrl-C
    /// handler.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.config.bindings
    }

    pub fn keys(&self) -> &KeyArbiter {
        &self.keys
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn calibration(&self) -> &CalibrationContext {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationContext {
        &mut self.calibration
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Position of the most recent successful [`observe`][Self::observe].
    pub fn last_position(&self) -> Option<Point> {
        self.last_position
    }

    pub fn is_grounded(&self) -> bool {
        self.detector.is_grounded()
    }

    // ── Cancellation & suspension ───────────────────────────────────────────

    /// Return `Err(Cancelled)` (after releasing every key) once the token
    /// has been cancelled.
    pub fn checkpoint(&self) -> Result<(), MoveError> {
        if self.cancel.is_cancelled() {
            warn!("cancellation requested; releasing all keys");
            self.keys.release_everything();
            return Err(MoveError::Cancelled);
        }
        Ok(())
    }

    /// Suspend for `duration` in poll-sized slices, checking for
    /// cancellation between slices.
    pub fn sleep(&self, duration: Duration) -> Result<(), MoveError> {
        let slice = self.config.poll_interval();
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.checkpoint()?;
            let step = remaining.min(slice);
            self.clock.sleep(step);
            remaining -= step;
        }
        self.checkpoint()
    }

    /// Press `key` for `hold` on behalf of `owner`.
    pub fn tap(&self, key: &Key, owner: Owner, hold: Duration) -> Result<(), MoveError> {
        self.checkpoint()?;
        self.keys.tap(key, owner, hold, self.clock.as_ref())?;
        self.checkpoint()
    }

    // ── Sensing ─────────────────────────────────────────────────────────────

    /// Poll the position source once, folding any new sample into the
    /// velocity estimate.  Waits (bounded by `sensor_timeout`) only when no
    /// sample has been produced yet or the newest one is older than
    /// `sensor_timeout`.
    ///
    /// # Errors
    ///
    /// - [`MoveError::SensorStale`] – no fresh sample within `sensor_timeout`.
    /// - [`MoveError::Cancelled`]
    pub fn observe(&mut self) -> Result<Observation, MoveError> {
        self.checkpoint()?;
        let timeout = self.config.sensor_timeout();
        let started = self.clock.now();
        let sample = loop {
            let now = self.clock.now();
            let latest = self.source.get_latest();
            match latest {
                Some(sample) if now.saturating_sub(sample.t) <= timeout => break sample,
                _ => {}
            }
            let waited = now.saturating_sub(started);
            if waited >= timeout {
                let silent = latest.map_or(waited, |s| now.saturating_sub(s.t));
                warn!(silent_ms = silent.as_millis() as u64, "no fresh position sample");
                return Err(MoveError::SensorStale { waited: silent });
            }
            self.sleep(self.config.poll_interval())?;
        };
        let now = self.clock.now();
        self.last_position = Some(sample.point());
        if self.velocity.ingest_at(sample, now) {
            debug!(x = sample.x, y = sample.y, t_ms = sample.t.as_millis() as u64, "sample accepted");
        }
        Ok(Observation {
            position: sample.point(),
            sample_t: sample.t,
            now,
            velocity: self.velocity.get(now),
            grounded: self.detector.is_grounded(),
            alive: self.detector.is_alive(),
        })
    }

    /// Poll until `done` accepts an observation.
    ///
    /// # Errors
    ///
    /// [`MoveError::Timeout`] naming `operation` once `timeout` elapses.
    pub fn wait_until(
        &mut self,
        timeout: Duration,
        operation: &str,
        mut done: impl FnMut(&Observation) -> bool,
    ) -> Result<Observation, MoveError> {
        let started = self.clock.now();
        loop {
            let obs = self.observe()?;
            if done(&obs) {
                return Ok(obs);
            }
            let elapsed = obs.now.saturating_sub(started);
            if elapsed >= timeout {
                return Err(MoveError::Timeout {
                    operation: operation.to_string(),
                    after: elapsed,
                });
            }
            self.sleep(self.config.poll_interval())?;
        }
    }

    /// Wait until the detector reports stable footing again, then for a
    /// sample captured after that instant.  The detector leads the latent
    /// position stream, so the first grounded observation may still carry a
    /// mid-air position.
    pub fn wait_landed(&mut self) -> Result<Observation, MoveError> {
        let timeout = self.config.landing_timeout();
        let landed = self.wait_until(timeout, "landing", |o| o.grounded)?;
        self.settle_after(landed.now, Duration::ZERO)
    }

    /// Wait for the first sample captured at least `settle` after `since`.
    pub fn settle_after(&mut self, since: Duration, settle: Duration) -> Result<Observation, MoveError> {
        let timeout = settle + self.config.sensor_timeout();
        self.wait_until(timeout, "settling", |o| o.sample_t >= since + settle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_hal::sim::SimConfig;
    use glide_hal::watch::{SharedFlags, sample_channel};
    use glide_types::PositionSample;

    fn sim_rig() -> (SimWorld, Rig) {
        let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
        let rig = Rig::simulated(&world, RigConfig::default());
        (world, rig)
    }

    #[test]
    fn simulated_rig_adopts_sample_interval() {
        let (_world, rig) = sim_rig();
        assert_eq!(rig.velocity.config().expected_interval_ms, 20);
    }

    #[test]
    fn last_position_tracks_observations() {
        let (_world, mut rig) = sim_rig();
        assert_eq!(rig.last_position(), None);
        rig.observe().unwrap();
        assert_eq!(rig.last_position(), Some(Point::new(50.0, 100.0)));
    }

    #[test]
    fn observe_reports_latency() {
        let (world, mut rig) = sim_rig();
        rig.sleep(Duration::from_millis(200)).unwrap();
        let obs = rig.observe().unwrap();
        assert_eq!(obs.now, world.now());
        assert_eq!(obs.latency(), Duration::from_millis(40));
    }

    #[test]
    fn missing_source_is_sensor_stale() {
        let (_publisher, source) = sample_channel();
        let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
        let mut rig = Rig::new(
            Arc::new(source),
            Arc::new(SharedFlags::new()),
            Arc::new(world.clone()),
            world,
            RigConfig::default(),
        );
        assert!(matches!(rig.observe(), Err(MoveError::SensorStale { .. })));
    }

    #[test]
    fn frozen_stream_is_stale_until_samples_resume() {
        let (world, mut rig) = sim_rig();
        world.schedule_outage(Duration::from_millis(50)..Duration::from_millis(1_200));
        rig.sleep(Duration::from_millis(600)).unwrap();

        let err = rig.observe().unwrap_err();
        assert!(matches!(err, MoveError::SensorStale { waited } if waited >= Duration::from_millis(500)));

        let obs = rig.observe().unwrap();
        assert!(obs.sample_t >= Duration::from_millis(1_100));
        assert!(obs.latency() < Duration::from_millis(100));
    }

    #[test]
    fn watch_source_feeds_observations() {
        let (publisher, source) = sample_channel();
        let world = SimWorld::new(SimConfig::default(), Point::new(0.0, 100.0));
        let mut rig = Rig::new(
            Arc::new(source),
            Arc::new(SharedFlags::new()),
            Arc::new(world.clone()),
            world,
            RigConfig::default(),
        );
        publisher.publish(PositionSample {
            x: 7.0,
            y: 3.0,
            t: Duration::ZERO,
            confidence: 0.8,
        });
        assert_eq!(rig.observe().unwrap().position, Point::new(7.0, 3.0));
    }

    #[test]
    fn wait_until_times_out() {
        let (world, mut rig) = sim_rig();
        let err = rig
            .wait_until(Duration::from_millis(100), "never", |_| false)
            .unwrap_err();
        assert!(matches!(err, MoveError::Timeout { ref operation, .. } if operation == "never"));
        assert!(world.now() >= Duration::from_millis(100));
    }

    #[test]
    fn cancellation_releases_keys() {
        let (world, rig) = sim_rig();
        let guard = rig.keys().acquire(&Key::new("right"), Owner::Mover).unwrap();
        rig.cancel_token().cancel();
        assert_eq!(rig.sleep(Duration::from_millis(50)), Err(MoveError::Cancelled));
        assert!(world.held_keys().is_empty());
        drop(guard);
        assert!(world.held_keys().is_empty());
    }

    #[test]
    fn settle_after_waits_for_post_release_sample() {
        let (_world, mut rig) = sim_rig();
        let since = rig.now();
        let obs = rig.settle_after(since, Duration::from_millis(100)).unwrap();
        assert!(obs.sample_t >= since + Duration::from_millis(100));
    }
}
