//! Horizontal motion primitives shared by the [`Adjuster`][crate::adjuster::Adjuster]
//! and the [`Mover`][crate::mover::Mover].
//!
//! - [`walk_predictive`] holds a direction key and releases it the instant
//!   the predicted stopping point crosses the target:
//!
//!   ```text
//!   predicted_stop = x + vx × (coast_time + (now − sample.t))
//!   ```
//!
//!   After the agent settles the realized coast distance, minus the share
//!   covered during capture latency, is fed back into the active
//!   [`DecelerationModel`][glide_perception::DecelerationModel].
//! - [`pulse`] presses a direction for a fixed time: taps, probe steps and
//!   brake probes are all pulses of different lengths.

use std::time::Duration;

use glide_kernel::Owner;
use glide_types::{Direction, MoveError};
use tracing::{debug, info, warn};

use crate::loop_guard::StallGuard;
use crate::rig::{Observation, Rig};

/// Why a predictive walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Released on the predictive-stop condition.
    Arrived,
    /// Left the platform while walking.
    Fell,
    /// Key held but the position did not change.
    Stalled,
    TimedOut,
    /// The velocity estimate became stale or unknown; prediction stopped.
    VelocityLost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkOutcome {
    pub end: WalkEnd,
    /// Observation after the agent settled (or landed, for [`WalkEnd::Fell`]).
    pub settled: Observation,
    /// Coast time after folding in this stop, when the stop was usable.
    pub coast_update: Option<f32>,
}

/// Walk toward `target_x` with predictive release.
///
/// # Errors
///
/// Only fatal errors and [`MoveError::SensorStale`]; every other way the
/// walk can end is reported through [`WalkEnd`].
pub fn walk_predictive(
    rig: &mut Rig,
    owner: Owner,
    target_x: f32,
    timeout: Duration,
) -> Result<WalkOutcome, MoveError> {
    let start = rig.observe()?;
    let direction = Direction::toward_x(target_x - start.position.x);
    let key = rig.bindings().direction(direction).clone();
    let poll = rig.config().poll_interval();
    let mut stall = StallGuard::new(rig.config().stall_polls, rig.config().stall_tolerance);

    debug!(from = start.position.x, target_x, %direction, "predictive walk");
    let guard = rig.keys().acquire(&key, owner)?;
    let (end, at_release) = loop {
        rig.sleep(poll)?;
        let obs = rig.observe()?;
        if !obs.grounded {
            break (WalkEnd::Fell, obs);
        }
        if !obs.velocity_usable() {
            break (WalkEnd::VelocityLost, obs);
        }
        let coast = rig.calibration().active().predict(obs.velocity.vx);
        let horizon = coast + obs.latency().as_secs_f32();
        let predicted = obs.position.x + obs.velocity.vx * horizon;
        if (target_x - predicted) * direction.sign() <= 0.0 {
            break (WalkEnd::Arrived, obs);
        }
        if stall.record(obs.position.x) {
            break (WalkEnd::Stalled, obs);
        }
        if obs.now.saturating_sub(start.now) >= timeout {
            break (WalkEnd::TimedOut, obs);
        }
    };
    guard.release()?;
    let released_at = rig.now();

    if end == WalkEnd::Fell {
        info!(x = at_release.position.x, y = at_release.position.y, "left the platform while walking");
        let landed = rig.wait_landed()?;
        return Ok(WalkOutcome {
            end,
            settled: landed,
            coast_update: None,
        });
    }

    let settled = rig.settle_after(released_at, rig.config().settle())?;
    let coast_update = if end == WalkEnd::Arrived && settled.grounded {
        calibrate(rig, &at_release, &settled, direction)
    } else {
        None
    };
    if end != WalkEnd::Arrived {
        warn!(?end, x = settled.position.x, target_x, "walk ended early");
    }
    Ok(WalkOutcome {
        end,
        settled,
        coast_update,
    })
}

fn calibrate(rig: &mut Rig, at_release: &Observation, settled: &Observation, direction: Direction) -> Option<f32> {
    let speed = at_release.velocity.vx.abs();
    let travelled = (settled.position.x - at_release.position.x) * direction.sign();
    let coast = (travelled - speed * at_release.latency().as_secs_f32()).max(0.0);
    match rig
        .calibration_mut()
        .active_mut()
        .observe(coast, at_release.velocity.vx)
    {
        Ok(updated) => updated,
        Err(e) => {
            warn!(error = %e, coast, speed, "coast observation discarded");
            None
        }
    }
}

/// Hold `direction` for `hold`, release, and return the settled observation.
pub fn pulse(rig: &mut Rig, owner: Owner, direction: Direction, hold: Duration) -> Result<Observation, MoveError> {
    let key = rig.bindings().direction(direction).clone();
    rig.tap(&key, owner, hold)?;
    let released_at = rig.now();
    rig.settle_after(released_at, rig.config().settle())
}
