//! Vertical traversal primitives.
//!
//! The [`Adjuster`][crate::adjuster::Adjuster] does not care *how* the agent
//! changes platform; it holds a [`VerticalPrimitive`] chosen at configuration
//! time through [`VerticalKind`]:
//!
//! | Kind | Up | Down |
//! |---|---|---|
//! | [`RopeClimb`] | tap the rope key | hold down, tap jump (drop through) |
//! | [`Teleport`] | tap teleport | hold down, tap teleport |
//!
//! Both primitives share one monitoring scheme: after triggering, watch a
//! short confirmation window for *any* sign of motion (leaving the ground or
//! a vertical position change).  No sign means the attempt had no effect and
//! is reported as [`VerticalOutcome::NoEffect`] without waiting out the full
//! arrival timeout.  Otherwise wait, bounded, for the agent to be grounded on
//! a different level.

use std::time::Duration;

use glide_kernel::Owner;
use glide_types::{Direction, Key, MoveError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::rig::Rig;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which primitive the adjuster uses for vertical corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalKind {
    #[default]
    RopeClimb,
    Teleport,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalConfig {
    pub kind: VerticalKind,
    /// How long the trigger key is held.
    pub key_hold_ms: u64,
    /// Window in which the attempt must show any effect.
    pub confirm_window_ms: u64,
    /// Upper bound on reaching the new level once motion started.
    pub arrival_timeout_ms: u64,
    /// Minimum vertical displacement that counts as a level change.
    pub min_displacement: f32,
}

impl Default for VerticalConfig {
    fn default() -> Self {
        Self {
            kind: VerticalKind::RopeClimb,
            key_hold_ms: 40,
            confirm_window_ms: 150,
            arrival_timeout_ms: 2500,
            min_displacement: 4.0,
        }
    }
}

impl VerticalKind {
    pub fn build(self, config: VerticalConfig) -> Box<dyn VerticalPrimitive> {
        match self {
            VerticalKind::RopeClimb => Box::new(RopeClimb { config }),
            VerticalKind::Teleport => Box::new(Teleport { config }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerticalOutcome {
    /// Grounded on a new level at `y`.
    Arrived { y: f32 },
    /// The trigger had no observable effect.
    NoEffect,
}

/// One way of moving the agent between platforms.
pub trait VerticalPrimitive: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt one level change in `direction` ([`Direction::Up`] or
    /// [`Direction::Down`]).
    ///
    /// # Errors
    ///
    /// [`MoveError::Timeout`] when motion started but the agent never came
    /// to rest on a new level; fatal errors from the rig.
    fn execute(&self, rig: &mut Rig, direction: Direction) -> Result<VerticalOutcome, MoveError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

pub struct RopeClimb {
    config: VerticalConfig,
}

impl VerticalPrimitive for RopeClimb {
    fn name(&self) -> &'static str {
        "rope climb"
    }

    fn execute(&self, rig: &mut Rig, direction: Direction) -> Result<VerticalOutcome, MoveError> {
        let trigger = match direction {
            Direction::Down => rig.bindings().jump.clone(),
            _ => rig.bindings().rope.clone(),
        };
        traverse(rig, &self.config, direction, &trigger, self.name())
    }
}

pub struct Teleport {
    config: VerticalConfig,
}

impl VerticalPrimitive for Teleport {
    fn name(&self) -> &'static str {
        "teleport"
    }

    fn execute(&self, rig: &mut Rig, direction: Direction) -> Result<VerticalOutcome, MoveError> {
        let trigger = rig.bindings().teleport.clone();
        traverse(rig, &self.config, direction, &trigger, self.name())
    }
}

fn traverse(
    rig: &mut Rig,
    config: &VerticalConfig,
    direction: Direction,
    trigger: &Key,
    name: &str,
) -> Result<VerticalOutcome, MoveError> {
    let start = rig.observe()?;
    let hold = Duration::from_millis(config.key_hold_ms);
    debug!(primitive = name, %direction, y = start.position.y, "vertical attempt");

    if direction == Direction::Down {
        let down = rig.bindings().down.clone();
        let modifier = rig.keys().acquire(&down, Owner::Adjuster)?;
        rig.tap(trigger, Owner::Adjuster, hold)?;
        modifier.release()?;
    } else {
        rig.tap(trigger, Owner::Adjuster, hold)?;
    }

    let moved_enough = |y: f32| (y - start.position.y) * direction.sign() >= config.min_displacement;

    let confirm = Duration::from_millis(config.confirm_window_ms);
    let triggered_at = rig.now();
    let mut moving = false;
    loop {
        let obs = rig.observe()?;
        if !obs.grounded || moved_enough(obs.position.y) {
            moving = true;
            break;
        }
        if obs.now.saturating_sub(triggered_at) >= confirm {
            break;
        }
        rig.sleep(rig.config().poll_interval())?;
    }
    if !moving {
        info!(primitive = name, %direction, x = start.position.x, y = start.position.y, "vertical attempt had no effect");
        return Ok(VerticalOutcome::NoEffect);
    }

    let timeout = Duration::from_millis(config.arrival_timeout_ms);
    let landed = rig.wait_until(timeout, name, |o| o.grounded && moved_enough(o.position.y))?;
    // The detector reports landing before the latent position stream does.
    let arrived = rig.settle_after(landed.now, Duration::ZERO)?;
    info!(primitive = name, %direction, y = arrived.position.y, "vertical traversal complete");
    Ok(VerticalOutcome::Arrived { y: arrived.position.y })
}
