//! Self-calibrating coast model.
//!
//! How far the agent slides after a direction key is released depends on the
//! character, the client, and the machine it runs on, so it cannot be a fixed
//! constant.  [`DecelerationModel`] keeps a *coast time* `c` such that
//!
//! ```text
//! coast_distance ≈ |velocity| × c
//! ```
//!
//! and nudges it toward every realized stop with an EMA, clamped to a
//! configured band.  Outcomes wildly outside the band are treated as
//! [`MoveError::CalibrationDivergence`] and ignored (clamp, don't trust).
//!
//! [`CalibrationContext`] owns one model per movement profile.  It is an
//! ordinary value owned by the movement subsystem instance, so every test can
//! start from a fresh context.

use std::collections::BTreeMap;

use glide_types::MoveError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tunables shared by every profile's model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecelerationConfig {
    /// Coast time used before any stop has been observed (seconds).
    pub default_coast_time: f32,
    pub min_coast_time: f32,
    pub max_coast_time: f32,
    /// EMA weight of a new observation.
    pub alpha: f32,
    /// Stops below this speed (px/s) carry no usable signal.
    pub min_velocity: f32,
    /// Observations beyond `max × factor` or below `min / factor` are
    /// rejected as divergent.
    pub divergence_factor: f32,
}

impl Default for DecelerationConfig {
    fn default() -> Self {
        Self {
            default_coast_time: 0.08,
            min_coast_time: 0.01,
            max_coast_time: 0.4,
            alpha: 0.3,
            min_velocity: 5.0,
            divergence_factor: 3.0,
        }
    }
}

/// Calibrated coast time for one movement profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecelerationModel {
    coast_time: f32,
    confidence_count: u32,
    #[serde(skip)]
    config: DecelerationConfig,
}

impl DecelerationModel {
    pub fn new(config: DecelerationConfig) -> Self {
        Self {
            coast_time: config
                .default_coast_time
                .clamp(config.min_coast_time, config.max_coast_time),
            confidence_count: 0,
            config,
        }
    }

    /// Coast time to assume when stopping from `velocity`.
    ///
    /// The model is velocity-independent today; the argument keeps the call
    /// sites honest should a speed-dependent curve be fitted later.
    pub fn predict(&self, _velocity: f32) -> f32 {
        self.coast_time
    }

    /// Number of observations folded in so far.
    pub fn confidence_count(&self) -> u32 {
        self.confidence_count
    }

    /// Fold a realized stop into the model.
    ///
    /// Returns `Ok(None)` when the stop was too slow to be informative,
    /// `Ok(Some(coast_time))` with the updated value otherwise.
    ///
    /// # Errors
    ///
    /// [`MoveError::CalibrationDivergence`] when the implied coast time is
    /// implausible; the model is left unchanged.
    pub fn observe(&mut self, measured_distance: f32, velocity: f32) -> Result<Option<f32>, MoveError> {
        let speed = velocity.abs();
        if speed < self.config.min_velocity || !measured_distance.is_finite() {
            return Ok(None);
        }
        let implied = measured_distance.abs() / speed;
        let factor = self.config.divergence_factor.max(1.0);
        let lo = self.config.min_coast_time / factor;
        let hi = self.config.max_coast_time * factor;
        if implied < lo || implied > hi {
            warn!(
                implied,
                measured_distance, velocity, "coast observation rejected as divergent"
            );
            return Err(MoveError::CalibrationDivergence {
                observed: implied,
                min: lo,
                max: hi,
            });
        }

        let updated = self.coast_time + self.config.alpha * (implied - self.coast_time);
        self.coast_time = updated.clamp(self.config.min_coast_time, self.config.max_coast_time);
        self.confidence_count = self.confidence_count.saturating_add(1);
        debug!(
            coast_time = self.coast_time,
            implied,
            count = self.confidence_count,
            "coast model updated"
        );
        Ok(Some(self.coast_time))
    }
}

/// Calibration state for every movement profile used in this session.
#[derive(Debug, Clone)]
pub struct CalibrationContext {
    config: DecelerationConfig,
    active: String,
    profiles: BTreeMap<String, DecelerationModel>,
}

impl CalibrationContext {
    pub const DEFAULT_PROFILE: &'static str = "default";

    pub fn new(config: DecelerationConfig) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            Self::DEFAULT_PROFILE.to_string(),
            DecelerationModel::new(config),
        );
        Self {
            config,
            active: Self::DEFAULT_PROFILE.to_string(),
            profiles,
        }
    }

    /// Switch the active profile, creating it with default calibration on
    /// first use.  Other profiles keep their calibration.
    pub fn set_profile(&mut self, name: &str) {
        let config = self.config;
        self.profiles
            .entry(name.to_string())
            .or_insert_with(|| DecelerationModel::new(config));
        self.active = name.to_string();
    }

    pub fn active_profile(&self) -> &str {
        &self.active
    }

    pub fn active(&self) -> &DecelerationModel {
        // `active` always names an inserted profile.
        &self.profiles[&self.active]
    }

    pub fn active_mut(&mut self) -> &mut DecelerationModel {
        let config = self.config;
        self.profiles
            .entry(self.active.clone())
            .or_insert_with(|| DecelerationModel::new(config))
    }

    /// `(profile, coast_time, confidence_count)` for every profile.
    pub fn snapshot(&self) -> Vec<(String, f32, u32)> {
        self.profiles
            .iter()
            .map(|(name, m)| (name.clone(), m.coast_time, m.confidence_count))
            .collect()
    }
}
