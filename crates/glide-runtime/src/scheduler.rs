//! [`ActionScheduler`] – phased execution of registered actions.
//!
//! Every invocation runs the same phase sequence:
//!
//! ```text
//! CheckCooldown ─► PreSettle | GroundCheck ─► ReleaseShared? ─► Execute
//!               ─► RestoreShared? ─► PostDelay ─► Done
//! ```
//!
//! Timing comes from the action's [`ActionCategory`] defaults, optionally
//! overridden per category in [`SchedulerConfig::overrides`] or per action in
//! [`ActionDefinition::with_timing`].  Pre-settle and post-delay durations are
//! scaled by the performance multiplier and perturbed by bounded jitter from
//! a seedable RNG.
//!
//! Shared (continuously held) keys are suspended around the execute phase
//! through [`KeyArbiter::suspend_shared`][glide_kernel::KeyArbiter::suspend_shared]
//! unless the category keeps them held.  The guard restores them on every
//! exit path, so a failing hook never leaves them released.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use glide_hal::sim::{SimConfig, SimWorld};
//! use glide_runtime::rig::{Rig, RigConfig};
//! use glide_runtime::scheduler::{
//!     ActionCategory, ActionDefinition, ActionOutcome, ActionScheduler, SchedulerConfig,
//! };
//! use glide_types::{Key, Point};
//!
//! let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
//! let mut rig = Rig::simulated(&world, RigConfig::default());
//! let mut scheduler = ActionScheduler::new(SchedulerConfig::default());
//! scheduler.register(
//!     ActionDefinition::new("haste", ActionCategory::Buff)
//!         .with_keys(vec![Key::new("f1")])
//!         .with_cooldown("haste", Duration::from_secs(60)),
//! );
//!
//! let first = scheduler.invoke(&mut rig, "haste").unwrap();
//! assert_eq!(first.outcome, ActionOutcome::Executed);
//! let second = scheduler.invoke(&mut rig, "haste").unwrap();
//! assert!(matches!(second.outcome, ActionOutcome::CoolingDown { .. }));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use glide_kernel::{CooldownLedger, CooldownState, Owner};
use glide_types::{Key, MoveError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::rig::Rig;

// ─────────────────────────────────────────────────────────────────────────────
// Categories and timing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Attack,
    AreaAttack,
    Buff,
    Summon,
    Heal,
    Utility,
    Teleport,
    Movement,
    ManualControl,
    Interact,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 10] = [
        ActionCategory::Attack,
        ActionCategory::AreaAttack,
        ActionCategory::Buff,
        ActionCategory::Summon,
        ActionCategory::Heal,
        ActionCategory::Utility,
        ActionCategory::Teleport,
        ActionCategory::Movement,
        ActionCategory::ManualControl,
        ActionCategory::Interact,
    ];

    pub fn default_timing(self) -> CategoryTiming {
        let (pre_settle_ms, post_delay_ms, ground_check, keep_shared_keys) = match self {
            ActionCategory::Attack => (0, 80, false, false),
            ActionCategory::AreaAttack => (30, 120, true, false),
            ActionCategory::Buff => (50, 300, false, false),
            ActionCategory::Summon => (50, 250, true, false),
            ActionCategory::Heal => (0, 150, false, false),
            ActionCategory::Utility => (30, 150, false, false),
            ActionCategory::Teleport => (0, 100, false, true),
            ActionCategory::Movement => (0, 50, false, true),
            ActionCategory::ManualControl => (0, 0, false, true),
            ActionCategory::Interact => (100, 200, true, false),
        };
        CategoryTiming {
            pre_settle_ms,
            post_delay_ms,
            ground_check,
            keep_shared_keys,
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTiming {
    pub pre_settle_ms: u64,
    pub post_delay_ms: u64,
    /// Wait for stable footing instead of the fixed pre-settle.
    pub ground_check: bool,
    /// Leave shared keys held through the execute phase.
    pub keep_shared_keys: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scales pre-settle and post-delay (e.g. 1.5 on a slow machine).
    pub performance_multiplier: f32,
    /// Delays are perturbed by up to ± this many milliseconds.
    pub jitter_ms: u64,
    /// Fixed RNG seed for reproducible jitter.
    pub seed: Option<u64>,
    pub ground_check_timeout_ms: u64,
    /// Hold time of the default key tap.
    pub key_hold_ms: u64,
    pub overrides: BTreeMap<ActionCategory, CategoryTiming>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            performance_multiplier: 1.0,
            jitter_ms: 15,
            seed: None,
            ground_check_timeout_ms: 1_000,
            key_hold_ms: 30,
            overrides: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Upper bound applied to `performance_multiplier`.
    pub const MAX_PERFORMANCE_MULTIPLIER: f32 = 10.0;

    /// `performance_multiplier` clamped to `[0, MAX_PERFORMANCE_MULTIPLIER]`;
    /// NaN counts as 1.
    pub fn multiplier(&self) -> f32 {
        let m = self.performance_multiplier;
        if m.is_nan() { 1.0 } else { m.clamp(0.0, Self::MAX_PERFORMANCE_MULTIPLIER) }
    }

    pub fn timing(&self, category: ActionCategory) -> CategoryTiming {
        self.overrides
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_timing())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

pub type ExecuteHook = Arc<dyn Fn(&mut Rig) -> Result<(), MoveError> + Send + Sync>;

#[derive(Clone)]
pub struct ActionDefinition {
    pub id: String,
    pub category: ActionCategory,
    pub keys: Vec<Key>,
    pub timing: Option<CategoryTiming>,
    /// Cooldown key and interval.
    pub cooldown: Option<(String, Duration)>,
    pub execute: Option<ExecuteHook>,
}

impl ActionDefinition {
    pub fn new(id: impl Into<String>, category: ActionCategory) -> Self {
        Self {
            id: id.into(),
            category,
            keys: Vec::new(),
            timing: None,
            cooldown: None,
            execute: None,
        }
    }

    pub fn with_keys(mut self, keys: Vec<Key>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_cooldown(mut self, key: impl Into<String>, interval: Duration) -> Self {
        self.cooldown = Some((key.into(), interval));
        self
    }

    pub fn with_timing(mut self, timing: CategoryTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Replace the default "tap every bound key" behaviour.
    pub fn with_hook(mut self, hook: impl Fn(&mut Rig) -> Result<(), MoveError> + Send + Sync + 'static) -> Self {
        self.execute = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("keys", &self.keys)
            .field("timing", &self.timing)
            .field("cooldown", &self.cooldown)
            .field("execute", &self.execute.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    CheckCooldown,
    PreSettle,
    GroundCheck,
    ReleaseShared,
    Execute,
    RestoreShared,
    PostDelay,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Executed,
    /// Invoked inside its cooldown window; nothing was pressed.
    CoolingDown { remaining: Duration },
    Aborted(MoveError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub id: String,
    pub outcome: ActionOutcome,
    /// Phases entered, in order.
    pub phases: Vec<ActionPhase>,
    pub elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct ActionScheduler {
    config: SchedulerConfig,
    actions: HashMap<String, ActionDefinition>,
    cooldowns: CooldownLedger,
    rng: StdRng,
    executions: HashMap<String, u32>,
}

impl ActionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            actions: HashMap::new(),
            cooldowns: CooldownLedger::new(),
            rng,
            executions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register (or replace) an action under its id.
    pub fn register(&mut self, action: ActionDefinition) {
        debug!(id = %action.id, category = %action.category, "action registered");
        self.actions.insert(action.id.clone(), action);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// How many times `id` reached the execute phase.
    pub fn executions(&self, id: &str) -> u32 {
        self.executions.get(id).copied().unwrap_or(0)
    }

    /// Run the action registered under `id` through all phases.
    ///
    /// # Errors
    ///
    /// Only fatal errors.  Failures inside the action (including an unknown
    /// id) are reported as [`ActionOutcome::Aborted`].
    #[instrument(skip(self, rig), fields(category))]
    pub fn invoke(&mut self, rig: &mut Rig, id: &str) -> Result<ActionReport, MoveError> {
        let started = rig.now();
        let mut phases = Vec::new();

        let outcome = match self.actions.get(id).cloned() {
            Some(action) => {
                tracing::Span::current().record("category", action.category.to_string());
                match self.run_phases(rig, &action, &mut phases) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        let position = rig.last_position().map_or_else(|| "unknown".to_string(), |p| p.to_string());
                        let target = action.keys.iter().map(Key::to_string).collect::<Vec<_>>().join("+");
                        warn!(
                            id,
                            state = ?phases.last(),
                            position = %position,
                            target = %target,
                            retries = 0u32,
                            error = %e,
                            "action aborted"
                        );
                        ActionOutcome::Aborted(e)
                    }
                }
            }
            None => ActionOutcome::Aborted(MoveError::ActuationFailure {
                action: id.to_string(),
                details: "no such action registered".to_string(),
            }),
        };

        Ok(ActionReport {
            id: id.to_string(),
            outcome,
            phases,
            elapsed: rig.now().saturating_sub(started),
        })
    }

    fn run_phases(
        &mut self,
        rig: &mut Rig,
        action: &ActionDefinition,
        phases: &mut Vec<ActionPhase>,
    ) -> Result<ActionOutcome, MoveError> {
        let timing = action.timing.unwrap_or_else(|| self.config.timing(action.category));

        phases.push(ActionPhase::CheckCooldown);
        if let Some((key, interval)) = &action.cooldown {
            if let CooldownState::CoolingDown(remaining) = self.cooldowns.state(key, *interval, rig.now()) {
                info!(id = %action.id, remaining_ms = remaining.as_millis() as u64, "still cooling down; skipped");
                return Ok(ActionOutcome::CoolingDown { remaining });
            }
        }

        if timing.ground_check {
            phases.push(ActionPhase::GroundCheck);
            let timeout = Duration::from_millis(self.config.ground_check_timeout_ms);
            if let Err(e) = rig.wait_until(timeout, "ground check", |o| o.grounded) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(id = %action.id, error = %e, "not grounded; action not executed");
                return Ok(ActionOutcome::Aborted(e));
            }
        } else {
            phases.push(ActionPhase::PreSettle);
            let delay = self.scaled(timing.pre_settle_ms);
            rig.sleep(delay)?;
        }

        let suspension = if timing.keep_shared_keys {
            None
        } else {
            phases.push(ActionPhase::ReleaseShared);
            Some(rig.keys().suspend_shared()?)
        };

        phases.push(ActionPhase::Execute);
        let executed = self.execute(rig, action);

        if let Some(guard) = suspension {
            phases.push(ActionPhase::RestoreShared);
            drop(guard);
        }
        executed?;

        if let Some((key, _)) = &action.cooldown {
            self.cooldowns.record(key, rig.now());
        }
        *self.executions.entry(action.id.clone()).or_insert(0) += 1;

        phases.push(ActionPhase::PostDelay);
        let delay = self.scaled(timing.post_delay_ms);
        rig.sleep(delay)?;

        phases.push(ActionPhase::Done);
        debug!(id = %action.id, "action done");
        Ok(ActionOutcome::Executed)
    }

    fn execute(&self, rig: &mut Rig, action: &ActionDefinition) -> Result<(), MoveError> {
        match &action.execute {
            Some(hook) => hook(rig),
            None => {
                let hold = Duration::from_millis(self.config.key_hold_ms);
                for key in &action.keys {
                    rig.tap(key, Owner::Scheduler, hold)?;
                }
                Ok(())
            }
        }
    }

    /// `base × multiplier ± jitter`, never negative.
    fn scaled(&mut self, base_ms: u64) -> Duration {
        let scaled = base_ms as f32 * self.config.multiplier();
        let jitter = if self.config.jitter_ms == 0 || base_ms == 0 {
            0.0
        } else {
            let j = self.config.jitter_ms as i64;
            self.rng.gen_range(-j..=j) as f32
        };
        Duration::from_secs_f32(((scaled + jitter) / 1_000.0).max(0.0))
    }
}
