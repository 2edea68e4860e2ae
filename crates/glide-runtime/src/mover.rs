//! [`Mover`] – point-to-point navigation over the platform graph.
//!
//! A move run plans a waypoint path with the [`PathPlanner`], then follows
//! it hop by hop:
//!
//! - **vertical hops** (waypoint on another level) are delegated to the
//!   [`Adjuster`], which owns the vertical primitives and their recovery;
//! - **long horizontal hops** start with discrete skill steps while the
//!   remaining distance is at least `skill_trigger_distance` and more than
//!   `walk_skill_ratio` of the hop;
//! - the rest of each hop is a [`walk_predictive`] that is aborted the moment
//!   the agent leaves the platform.  A detected fall lands, re-plans from the
//!   landing point and continues, at most `max_replans` times.
//!
//! Final fine positioning onto the goal is always the Adjuster's job.
//!
//! Each run gets a fresh `run_id` recorded on its tracing span, so the log
//! lines of one move can be pulled out of an interleaved stream.

use std::sync::Arc;
use std::time::Duration;

use glide_kernel::Owner;
use glide_types::{Direction, MoveError, Point, TerminalStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adjuster::{AdjustReport, Adjuster, AdjusterConfig};
use crate::motion::{WalkEnd, pulse, walk_predictive};
use crate::path_planner::{PathPlanner, Plan, PlannerConfig, PlatformGraph, Waypoint};
use crate::rig::Rig;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Movement tuning.  The first five fields are the override surface exposed
/// to callers; the rest are internal bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    pub skill_trigger_distance: f32,
    /// Fraction of a hop always covered by walking.
    pub walk_skill_ratio: f32,
    pub brake_after_skill: bool,
    pub brake_duration_ms: u64,
    pub post_skill_settle_ms: u64,
    /// Minimum displacement for a skill step to count as progress.
    pub min_step_progress: f32,
    pub step_retries: u32,
    pub step_backoff_ms: u64,
    pub step_hold_ms: u64,
    /// Horizontal distance at which a waypoint counts as reached.
    pub waypoint_tolerance: f32,
    pub walk_timeout_ms: u64,
    pub max_replans: u32,
    pub planner: PlannerConfig,
    pub adjuster: AdjusterConfig,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            skill_trigger_distance: 60.0,
            walk_skill_ratio: 0.25,
            brake_after_skill: false,
            brake_duration_ms: 60,
            post_skill_settle_ms: 350,
            min_step_progress: 10.0,
            step_retries: 2,
            step_backoff_ms: 100,
            step_hold_ms: 40,
            waypoint_tolerance: 4.0,
            walk_timeout_ms: 5_000,
            max_replans: 3,
            planner: PlannerConfig::default(),
            adjuster: AdjusterConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    pub run_id: Uuid,
    pub status: TerminalStatus,
    pub goal: Point,
    /// Best-effort final position.
    pub position: Point,
    pub waypoints_visited: usize,
    pub replans: u32,
    pub skill_steps: u32,
    pub step_retries: u32,
    /// Hops finished by the Adjuster after the velocity estimate was lost.
    pub handovers: u32,
    /// Report of the last Adjuster run, if one happened.
    pub adjust: Option<AdjustReport>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Progress {
    position: Point,
    waypoints_visited: usize,
    replans: u32,
    skill_steps: u32,
    step_retries: u32,
    handovers: u32,
    adjust: Option<AdjustReport>,
}

/// How following one hop ended.
enum Hop {
    Reached,
    /// Fell off the platform; the path must be re-planned.
    Replan,
    Failed(MoveError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Mover
// ─────────────────────────────────────────────────────────────────────────────

pub struct Mover {
    planner: PathPlanner,
    adjuster: Adjuster,
    config: MoverConfig,
}

impl Mover {
    pub fn new(graph: Arc<PlatformGraph>, config: MoverConfig) -> Self {
        let planner = PathPlanner::new(Arc::clone(&graph), config.planner);
        let adjuster = Adjuster::new(config.adjuster.clone()).with_graph(graph);
        Self {
            planner,
            adjuster,
            config,
        }
    }

    /// Replace the adjuster, e.g. to plug in a different vertical primitive.
    pub fn with_adjuster(mut self, adjuster: Adjuster) -> Self {
        self.adjuster = adjuster;
        self
    }

    pub fn config(&self) -> &MoverConfig {
        &self.config
    }

    pub fn planner(&self) -> &PathPlanner {
        &self.planner
    }

    /// Move the agent to `goal`.
    ///
    /// # Errors
    ///
    /// Only fatal errors (cancellation, hardware, key conflicts).  Planning
    /// and actuation failures end up in [`MoveReport::status`].
    #[instrument(skip(self, rig, goal), fields(run_id = tracing::field::Empty, goal = %goal))]
    pub fn move_to(&self, rig: &mut Rig, goal: Point) -> Result<MoveReport, MoveError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", run_id.to_string());

        let started = rig.now();
        let mut progress = Progress::default();
        let status = match self.run(rig, goal, &mut progress) {
            Ok(status) => status,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => TerminalStatus::Failed(e),
        };

        match &status {
            TerminalStatus::Settled => info!(position = %progress.position, replans = progress.replans, "move complete"),
            TerminalStatus::Failed(e) => warn!(
                position = %progress.position,
                target = %goal,
                replans = progress.replans,
                retries = progress.step_retries,
                error = %e,
                "move failed"
            ),
        }

        Ok(MoveReport {
            run_id,
            status,
            goal,
            position: progress.position,
            waypoints_visited: progress.waypoints_visited,
            replans: progress.replans,
            skill_steps: progress.skill_steps,
            step_retries: progress.step_retries,
            handovers: progress.handovers,
            adjust: progress.adjust,
            elapsed: rig.now().saturating_sub(started),
        })
    }

    fn run(&self, rig: &mut Rig, goal: Point, progress: &mut Progress) -> Result<TerminalStatus, MoveError> {
        'plan: loop {
            let start = self.ready(rig, progress)?;
            let waypoints = match self.planner.plan(start, goal) {
                Plan::Found(waypoints) => waypoints,
                Plan::NoPath {
                    nearest_reachable,
                    reason,
                } => return self.fall_back(rig, goal, nearest_reachable, reason, progress),
            };
            info!(hops = waypoints.len(), from = %start, "path planned");

            for waypoint in &waypoints {
                match self.follow(rig, waypoint, progress)? {
                    Hop::Reached => progress.waypoints_visited += 1,
                    Hop::Failed(e) => return Ok(TerminalStatus::Failed(e)),
                    Hop::Replan => {
                        progress.replans += 1;
                        if progress.replans > self.config.max_replans {
                            return Ok(TerminalStatus::Failed(MoveError::PlanningFailure(format!(
                                "gave up after {} re-plans",
                                self.config.max_replans
                            ))));
                        }
                        info!(replan = progress.replans, "re-planning after fall");
                        continue 'plan;
                    }
                }
            }
            break;
        }

        self.finish(rig, goal, progress)
    }

    /// Observe, failing on a dead agent and waiting out any airborne phase.
    fn ready(&self, rig: &mut Rig, progress: &mut Progress) -> Result<Point, MoveError> {
        let mut obs = rig.observe()?;
        if !obs.alive {
            return Err(MoveError::ActuationFailure {
                action: "move".to_string(),
                details: "agent is not alive".to_string(),
            });
        }
        if !obs.grounded {
            obs = rig.wait_landed()?;
        }
        progress.position = obs.position;
        Ok(obs.position)
    }

    fn follow(&self, rig: &mut Rig, waypoint: &Waypoint, progress: &mut Progress) -> Result<Hop, MoveError> {
        let from = self.ready(rig, progress)?;
        let to = waypoint.point();
        debug!(waypoint = waypoint.id, from = %from, to = %to, "next hop");

        if (to.y - from.y).abs() > self.config.adjuster.y_tolerance {
            let report = self.adjuster.adjust(rig, to)?;
            progress.position = report.position;
            let status = report.status.clone();
            progress.adjust = Some(report);
            return Ok(match status {
                TerminalStatus::Settled => Hop::Reached,
                TerminalStatus::Failed(e) => Hop::Failed(e),
            });
        }

        let total = (to.x - from.x).abs();
        if total <= self.config.waypoint_tolerance {
            return Ok(Hop::Reached);
        }
        let direction = Direction::toward_x(to.x - from.x);

        if total >= self.config.skill_trigger_distance {
            if let Err(e) = self.skill_steps(rig, to.x, total, direction, progress) {
                if e.is_fatal() {
                    return Err(e);
                }
                return Ok(Hop::Failed(e));
            }
        }

        let remaining = (to.x - progress.position.x).abs();
        if remaining <= self.config.waypoint_tolerance {
            return Ok(Hop::Reached);
        }

        let outcome = walk_predictive(
            rig,
            Owner::Mover,
            to.x,
            Duration::from_millis(self.config.walk_timeout_ms),
        )?;
        progress.position = outcome.settled.position;
        match outcome.end {
            WalkEnd::Arrived => Ok(Hop::Reached),
            WalkEnd::Fell => Ok(Hop::Replan),
            WalkEnd::VelocityLost => {
                info!(x = outcome.settled.position.x, to = %to, "velocity lost mid-hop; handing over to the adjuster");
                progress.handovers += 1;
                let report = self.adjuster.adjust(rig, to)?;
                progress.position = report.position;
                let status = report.status.clone();
                progress.adjust = Some(report);
                Ok(match status {
                    TerminalStatus::Settled => Hop::Reached,
                    TerminalStatus::Failed(e) => Hop::Failed(e),
                })
            }
            WalkEnd::Stalled | WalkEnd::TimedOut => Ok(Hop::Failed(MoveError::ActuationFailure {
                action: "walk".to_string(),
                details: format!("{:?} at {} heading for {to}", outcome.end, outcome.settled.position),
            })),
        }
    }

    fn skill_steps(
        &self,
        rig: &mut Rig,
        target_x: f32,
        total: f32,
        direction: Direction,
        progress: &mut Progress,
    ) -> Result<(), MoveError> {
        let walk_share = total * self.config.walk_skill_ratio;
        let mut taken = 0;
        loop {
            let remaining = (target_x - progress.position.x) * direction.sign();
            if remaining < self.config.skill_trigger_distance || remaining <= walk_share {
                break;
            }
            self.step_with_retries(rig, direction, progress)?;
            progress.skill_steps += 1;
            taken += 1;
        }

        if self.config.brake_after_skill && taken > 0 {
            let hold = Duration::from_millis(self.config.brake_duration_ms);
            let obs = pulse(rig, Owner::Mover, direction.opposite(), hold)?;
            progress.position = obs.position;
        }
        Ok(())
    }

    fn step_with_retries(&self, rig: &mut Rig, direction: Direction, progress: &mut Progress) -> Result<(), MoveError> {
        let mut attempt = 0;
        loop {
            match self.step_once(rig, direction, progress) {
                Ok(()) => return Ok(()),
                Err(e @ MoveError::ActuationFailure { .. }) if attempt < self.config.step_retries => {
                    attempt += 1;
                    progress.step_retries += 1;
                    warn!(
                        state = "skill step",
                        position = %progress.position,
                        retry = attempt,
                        error = %e,
                        "step made no progress; retrying"
                    );
                    rig.sleep(Duration::from_millis(self.config.step_backoff_ms) * attempt)?;
                }
                Err(MoveError::ActuationFailure { details, .. }) => {
                    return Err(MoveError::ActuationFailure {
                        action: "skill step".to_string(),
                        details: format!("{details} after {} retries", self.config.step_retries),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hold the direction, tap the step key, then verify the displacement.
    fn step_once(&self, rig: &mut Rig, direction: Direction, progress: &mut Progress) -> Result<(), MoveError> {
        let before = rig.observe()?;
        let direction_key = rig.bindings().direction(direction).clone();
        let step_key = rig.bindings().step.clone();

        let held = rig.keys().acquire(&direction_key, Owner::Mover)?;
        rig.tap(&step_key, Owner::Mover, Duration::from_millis(self.config.step_hold_ms))?;
        held.release()?;

        let landed = rig.wait_landed()?;
        let after = rig.settle_after(landed.now, Duration::from_millis(self.config.post_skill_settle_ms))?;
        progress.position = after.position;

        let moved = (after.position.x - before.position.x) * direction.sign();
        if moved < self.config.min_step_progress {
            return Err(MoveError::ActuationFailure {
                action: "skill step".to_string(),
                details: format!("moved {moved:.1}px"),
            });
        }
        debug!(moved, x = after.position.x, "skill step");
        Ok(())
    }

    fn finish(&self, rig: &mut Rig, goal: Point, progress: &mut Progress) -> Result<TerminalStatus, MoveError> {
        let report = self.adjuster.adjust(rig, goal)?;
        progress.position = report.position;
        let status = report.status.clone();
        progress.adjust = Some(report);
        Ok(status)
    }

    fn fall_back(
        &self,
        rig: &mut Rig,
        goal: Point,
        nearest_reachable: Option<Waypoint>,
        reason: String,
        progress: &mut Progress,
    ) -> Result<TerminalStatus, MoveError> {
        let fallback = nearest_reachable.map_or(goal, |w| w.point());
        warn!(reason = %reason, fallback = %fallback, target = %goal, "no path; adjusting toward nearest reachable point");

        let report = self.adjuster.adjust(rig, fallback)?;
        progress.position = report.position;
        progress.adjust = Some(report);

        let dead_band = self.config.adjuster.dead_band();
        let on_goal = (progress.position.x - goal.x).abs() < dead_band
            && (progress.position.y - goal.y).abs() <= self.config.adjuster.y_tolerance;
        if on_goal {
            Ok(TerminalStatus::Settled)
        } else {
            Ok(TerminalStatus::Failed(MoveError::PlanningFailure(reason)))
        }
    }
}
