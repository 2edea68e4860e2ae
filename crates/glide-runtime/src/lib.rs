//! `glide-runtime` – the movement and action control loop.
//!
//! Everything here runs on one cooperative control loop: timed primitives
//! suspend through the [`Rig`][rig::Rig]'s clock, every wait is timeout
//! bounded, and cancellation is checked at each suspension point.
//!
//! # Modules
//!
//! - [`rig`] – [`Rig`][rig::Rig]: the bundle of position source, detector,
//!   clock, [`KeyArbiter`][glide_kernel::KeyArbiter], velocity estimator and
//!   calibration context that every component drives.
//! - [`motion`] – predictive walks with coast calibration, and fixed-length
//!   direction pulses (taps, probes, brakes).
//! - [`vertical`] – [`VerticalPrimitive`][vertical::VerticalPrimitive]
//!   capability trait with rope-climb and teleport implementations.
//! - [`adjuster`] – [`Adjuster`][adjuster::Adjuster]: the fine-positioning
//!   state machine with its pure transition function
//!   [`classify`][adjuster::classify] and tiered vertical recovery.
//! - [`path_planner`] – [`PathPlanner`][path_planner::PathPlanner]: A* over
//!   an immutable [`PlatformGraph`][path_planner::PlatformGraph].
//! - [`mover`] – [`Mover`][mover::Mover]: plans a path, follows it with walks
//!   and skill steps, re-plans after falls, and hands the last metres to the
//!   Adjuster.
//! - [`scheduler`] – [`ActionScheduler`][scheduler::ActionScheduler]: phased
//!   execution of registered actions with cooldowns, ground checks and
//!   shared-key suspension.
//! - [`loop_guard`] – [`StallGuard`][loop_guard::StallGuard]: detects a held
//!   key that produces no motion.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber (compact or JSON).
//!
//! # Key safety
//!
//! Components never talk to the [`KeyActuator`][glide_hal::KeyActuator]
//! directly.  Every press goes through the rig's
//! [`KeyArbiter`][glide_kernel::KeyArbiter], so each key has at most one
//! owner and every held key is released on every exit path.

pub mod adjuster;
pub mod loop_guard;
pub mod motion;
pub mod mover;
pub mod path_planner;
pub mod rig;
pub mod scheduler;
pub mod telemetry;
pub mod vertical;

pub use adjuster::{AdjustReport, AdjustState, Adjuster, AdjusterConfig};
pub use loop_guard::StallGuard;
pub use mover::{MoveReport, Mover, MoverConfig};
pub use path_planner::{Edge, PathPlanner, Plan, PlannerConfig, PlatformGraph, Waypoint};
pub use rig::{Observation, Rig, RigConfig};
pub use scheduler::{
    ActionCategory, ActionDefinition, ActionOutcome, ActionPhase, ActionReport, ActionScheduler, CategoryTiming,
    SchedulerConfig,
};
pub use vertical::{VerticalConfig, VerticalKind, VerticalOutcome, VerticalPrimitive};
