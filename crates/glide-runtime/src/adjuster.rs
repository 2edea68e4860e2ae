//! [`Adjuster`] – fine positioning onto a target point.
//!
//! The adjuster is a small state machine re-evaluated on every tick:
//!
//! ```text
//!            ┌────────────── not grounded ───────────────┐
//!            ▼                                           │
//!   Idle ─► YRecovery ─► XAdjust ─► YAdjust ─► Settled   │
//!                          ▲  │        │                 │
//!                          └──┴────────┴──► Failed ◄─────┘
//! ```
//!
//! [`classify`] is the pure transition function: given one observation it
//! picks the state to run next, in priority order
//!
//! 1. not grounded → [`AdjustState::YRecovery`] (wait for landing),
//! 2. horizontal error ≥ dead-band, unless suppressed → [`AdjustState::XAdjust`],
//! 3. vertical error > `y_tolerance` → [`AdjustState::YAdjust`],
//! 4. otherwise → [`AdjustState::Settled`].
//!
//! Horizontal corrections pick a sub-policy by distance ([`x_policy`]):
//! a continuous predictive walk when far, a brake probe against residual
//! motion followed by a walk at medium range, short taps when near, and
//! non-predictive probe steps whenever the velocity estimate is unusable.
//!
//! Vertical corrections go through the configured
//! [`VerticalPrimitive`][crate::vertical::VerticalPrimitive].  Failed
//! attempts escalate in tiers: `local_retries` attempts in place (horizontal
//! correction suppressed), then up to `search_walks` walks to untried anchor
//! nodes of the platform graph, and `Failed(Exhaustion)` once `max_failures`
//! attempts have failed in total.

use std::sync::Arc;
use std::time::Duration;

use glide_kernel::Owner;
use glide_types::{Direction, MoveError, Point, TerminalStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::motion::{WalkEnd, pulse, walk_predictive};
use crate::path_planner::{PlatformGraph, Waypoint};
use crate::rig::{Observation, Rig};
use crate::vertical::{VerticalConfig, VerticalOutcome, VerticalPrimitive};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    /// Position quantization of the detection pipeline (px).
    pub quantum: f32,
    /// Dead-band = `dead_band_factor × quantum`.  Errors below it are never
    /// corrected.
    pub dead_band_factor: f32,
    pub y_tolerance: f32,
    /// Beyond this horizontal error the agent walks continuously.
    pub far_distance: f32,
    /// At or below this horizontal error the agent taps.
    pub near_distance: f32,
    pub brake_probe_ms: u64,
    /// Residual speed (px/s) above which a medium correction brakes first.
    pub brake_min_speed: f32,
    pub tap_ms: u64,
    /// Walk length of a non-predictive probe step.
    pub probe_ms: u64,
    pub walk_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub max_ticks: u32,
    pub max_x_corrections: u32,
    /// Bounded local retries for transient failures (stale sensor, stalled
    /// walk).
    pub transient_retries: u32,
    pub transient_backoff_ms: u64,
    /// Vertical attempts in place before searching for another position.
    pub local_retries: u32,
    /// Walks to untried anchor nodes.
    pub search_walks: u32,
    /// Cumulative vertical failures that end the run.
    pub max_failures: u32,
    pub vertical: VerticalConfig,
}

impl AdjusterConfig {
    pub fn dead_band(&self) -> f32 {
        self.dead_band_factor * self.quantum
    }
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            quantum: 1.0,
            dead_band_factor: 1.5,
            y_tolerance: 3.0,
            far_distance: 40.0,
            near_distance: 8.0,
            brake_probe_ms: 30,
            brake_min_speed: 10.0,
            tap_ms: 40,
            probe_ms: 80,
            walk_timeout_ms: 5_000,
            run_timeout_ms: 30_000,
            max_ticks: 400,
            max_x_corrections: 24,
            transient_retries: 3,
            transient_backoff_ms: 50,
            local_retries: 3,
            search_walks: 2,
            max_failures: 8,
            vertical: VerticalConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AdjustState {
    Idle,
    YRecovery,
    XAdjust,
    YAdjust,
    Settled,
    Failed(MoveError),
}

/// Everything [`classify`] looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub position: Point,
    pub grounded: bool,
    /// Horizontal goal of this tick: the target, or an anchor while
    /// searching for a launch position.
    pub x_goal: f32,
    pub target_y: f32,
    /// Horizontal correction is deferred until the vertical one succeeds.
    pub suppress_x: bool,
}

/// Pure transition function of the adjuster.
pub fn classify(input: &TickInput, config: &AdjusterConfig) -> AdjustState {
    let x_error = (input.x_goal - input.position.x).abs();
    let y_error = (input.target_y - input.position.y).abs();
    let x_off = x_error >= config.dead_band();

    if !input.grounded {
        AdjustState::YRecovery
    } else if x_off && !input.suppress_x {
        AdjustState::XAdjust
    } else if y_error > config.y_tolerance {
        AdjustState::YAdjust
    } else if x_off {
        AdjustState::XAdjust
    } else {
        AdjustState::Settled
    }
}

/// Horizontal correction sub-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPolicy {
    Walk,
    BrakeThenWalk,
    Tap,
    Probe,
}

pub fn x_policy(distance: f32, velocity_usable: bool, config: &AdjusterConfig) -> XPolicy {
    if distance <= config.near_distance {
        XPolicy::Tap
    } else if !velocity_usable {
        XPolicy::Probe
    } else if distance > config.far_distance {
        XPolicy::Walk
    } else {
        XPolicy::BrakeThenWalk
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustReport {
    pub status: TerminalStatus,
    pub target: Point,
    /// Last observed position (best effort on failure).
    pub position: Point,
    pub ticks: u32,
    pub x_corrections: u32,
    pub vertical_attempts: u32,
    pub vertical_failures: u32,
    pub search_walks: u32,
    /// Transient failures (stale sensor, stalled walk) retried in place.
    pub transient_retries: u32,
    pub key_presses: u64,
    pub elapsed: Duration,
}

struct Run {
    target: Point,
    state: AdjustState,
    x_goal: f32,
    searching: bool,
    suppress_x: bool,
    position: Point,
    ticks: u32,
    x_corrections: u32,
    transient_failures: u32,
    vertical_attempts: u32,
    vertical_failures: u32,
    local_failures: u32,
    search_walks: u32,
    tried_x: Vec<f32>,
}

impl Run {
    fn new(target: Point) -> Self {
        Self {
            target,
            state: AdjustState::Idle,
            x_goal: target.x,
            searching: false,
            suppress_x: false,
            position: target,
            ticks: 0,
            x_corrections: 0,
            transient_failures: 0,
            vertical_attempts: 0,
            vertical_failures: 0,
            local_failures: 0,
            search_walks: 0,
            tried_x: Vec::new(),
        }
    }

    fn end_search(&mut self) {
        self.x_goal = self.target.x;
        self.searching = false;
        self.suppress_x = false;
        self.local_failures = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adjuster
// ─────────────────────────────────────────────────────────────────────────────

pub struct Adjuster {
    config: AdjusterConfig,
    vertical: Box<dyn VerticalPrimitive>,
    graph: Option<Arc<PlatformGraph>>,
}

impl Adjuster {
    pub fn new(config: AdjusterConfig) -> Self {
        let vertical = config.vertical.kind.build(config.vertical);
        Self {
            config,
            vertical,
            graph: None,
        }
    }

    /// Use the graph's anchor nodes as fallback launch positions.
    pub fn with_graph(mut self, graph: Arc<PlatformGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_vertical(mut self, vertical: Box<dyn VerticalPrimitive>) -> Self {
        self.vertical = vertical;
        self
    }

    pub fn config(&self) -> &AdjusterConfig {
        &self.config
    }

    /// Bring the agent onto `target`.
    ///
    /// # Errors
    ///
    /// Only fatal errors ([`MoveError::is_fatal`]).  Every other failure is
    /// reported as [`TerminalStatus::Failed`] together with the best-effort
    /// position.
    #[instrument(skip(self, rig, target), fields(target = %target))]
    pub fn adjust(&self, rig: &mut Rig, target: Point) -> Result<AdjustReport, MoveError> {
        let started = rig.now();
        let presses_before = rig.keys().stats().physical_presses;
        let mut run = Run::new(target);

        let status = loop {
            match self.step(rig, &mut run, started) {
                Ok(None) => {}
                Ok(Some(status)) => break status,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_transient() && run.transient_failures < self.config.transient_retries => {
                    run.transient_failures += 1;
                    warn!(
                        state = ?run.state,
                        position = %run.position,
                        target = %target,
                        retry = run.transient_failures,
                        error = %e,
                        "transient failure; retrying"
                    );
                    let backoff = Duration::from_millis(self.config.transient_backoff_ms) * run.transient_failures;
                    rig.sleep(backoff)?;
                }
                Err(e) => break TerminalStatus::Failed(e),
            }
        };

        if let TerminalStatus::Failed(e) = &status {
            warn!(
                state = ?run.state,
                position = %run.position,
                target = %target,
                retries = run.transient_failures,
                vertical_failures = run.vertical_failures,
                error = %e,
                "adjust failed"
            );
        } else {
            info!(position = %run.position, ticks = run.ticks, "settled");
        }

        Ok(AdjustReport {
            status,
            target,
            position: run.position,
            ticks: run.ticks,
            x_corrections: run.x_corrections,
            vertical_attempts: run.vertical_attempts,
            vertical_failures: run.vertical_failures,
            search_walks: run.search_walks,
            transient_retries: run.transient_failures,
            key_presses: rig.keys().stats().physical_presses - presses_before,
            elapsed: rig.now().saturating_sub(started),
        })
    }

    /// One tick.  `Ok(Some(_))` ends the run.
    fn step(&self, rig: &mut Rig, run: &mut Run, started: Duration) -> Result<Option<TerminalStatus>, MoveError> {
        run.ticks += 1;
        if run.ticks > self.config.max_ticks {
            return Ok(Some(TerminalStatus::Failed(MoveError::Exhaustion {
                operation: "adjust ticks".to_string(),
                attempts: self.config.max_ticks,
            })));
        }
        let elapsed = rig.now().saturating_sub(started);
        if elapsed > Duration::from_millis(self.config.run_timeout_ms) {
            return Ok(Some(TerminalStatus::Failed(MoveError::Timeout {
                operation: "adjust".to_string(),
                after: elapsed,
            })));
        }

        let obs = rig.observe()?;
        run.position = obs.position;
        let input = TickInput {
            position: obs.position,
            grounded: obs.grounded,
            x_goal: run.x_goal,
            target_y: run.target.y,
            suppress_x: run.suppress_x,
        };
        let next = classify(&input, &self.config);
        if next != run.state {
            debug!(from = ?run.state, to = ?next, x = obs.position.x, y = obs.position.y, "adjuster transition");
        }
        run.state = next.clone();

        match next {
            AdjustState::Settled if run.searching => {
                run.end_search();
                Ok(None)
            }
            AdjustState::Settled => Ok(Some(TerminalStatus::Settled)),
            AdjustState::YRecovery => {
                let landed = rig.wait_landed()?;
                run.position = landed.position;
                Ok(None)
            }
            AdjustState::XAdjust => {
                run.x_corrections += 1;
                if run.x_corrections > self.config.max_x_corrections {
                    return Ok(Some(TerminalStatus::Failed(MoveError::Exhaustion {
                        operation: "horizontal correction".to_string(),
                        attempts: self.config.max_x_corrections,
                    })));
                }
                self.correct_x(rig, &obs, run.x_goal)?;
                Ok(None)
            }
            AdjustState::YAdjust => self.correct_y(rig, &obs, run),
            AdjustState::Idle => Ok(None),
            AdjustState::Failed(e) => Ok(Some(TerminalStatus::Failed(e))),
        }
    }

    fn correct_x(&self, rig: &mut Rig, obs: &Observation, x_goal: f32) -> Result<(), MoveError> {
        let error = x_goal - obs.position.x;
        let direction = Direction::toward_x(error);
        let policy = x_policy(error.abs(), obs.velocity_usable(), &self.config);
        debug!(?policy, error, "horizontal correction");

        match policy {
            XPolicy::Tap => {
                pulse(rig, Owner::Adjuster, direction, Duration::from_millis(self.config.tap_ms))?;
                return Ok(());
            }
            XPolicy::Probe => {
                pulse(rig, Owner::Adjuster, direction, Duration::from_millis(self.config.probe_ms))?;
                return Ok(());
            }
            XPolicy::BrakeThenWalk if obs.velocity.vx.abs() > self.config.brake_min_speed => {
                let against = Direction::toward_x(-obs.velocity.vx);
                pulse(rig, Owner::Adjuster, against, Duration::from_millis(self.config.brake_probe_ms))?;
            }
            XPolicy::BrakeThenWalk | XPolicy::Walk => {}
        }

        let outcome = walk_predictive(
            rig,
            Owner::Adjuster,
            x_goal,
            Duration::from_millis(self.config.walk_timeout_ms),
        )?;
        match outcome.end {
            WalkEnd::Arrived | WalkEnd::Fell | WalkEnd::VelocityLost => Ok(()),
            WalkEnd::Stalled | WalkEnd::TimedOut => Err(MoveError::ActuationFailure {
                action: "walk".to_string(),
                details: format!("{:?} at x={:.1} heading for {x_goal:.1}", outcome.end, outcome.settled.position.x),
            }),
        }
    }

    fn correct_y(&self, rig: &mut Rig, obs: &Observation, run: &mut Run) -> Result<Option<TerminalStatus>, MoveError> {
        let direction = Direction::toward_y(run.target.y - obs.position.y);
        let dead_band = self.config.dead_band();
        if !run.tried_x.iter().any(|x| (x - obs.position.x).abs() < dead_band * 2.0) {
            run.tried_x.push(obs.position.x);
        }
        run.vertical_attempts += 1;

        let outcome = match self.vertical.execute(rig, direction) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "vertical traversal did not complete");
                VerticalOutcome::NoEffect
            }
        };

        match outcome {
            VerticalOutcome::Arrived { y } => {
                info!(primitive = self.vertical.name(), y, "level changed");
                run.end_search();
                Ok(None)
            }
            VerticalOutcome::NoEffect => Ok(self.record_vertical_failure(obs, run)),
        }
    }

    fn record_vertical_failure(&self, obs: &Observation, run: &mut Run) -> Option<TerminalStatus> {
        run.vertical_failures += 1;
        run.local_failures += 1;
        run.suppress_x = true;
        warn!(
            state = "YAdjust",
            position = %obs.position,
            target = %run.target,
            failures = run.vertical_failures,
            local = run.local_failures,
            primitive = self.vertical.name(),
            "vertical attempt failed"
        );

        if run.vertical_failures >= self.config.max_failures {
            return Some(TerminalStatus::Failed(MoveError::Exhaustion {
                operation: self.vertical.name().to_string(),
                attempts: run.vertical_failures,
            }));
        }
        if run.local_failures < self.config.local_retries {
            return None;
        }

        run.local_failures = 0;
        if run.search_walks >= self.config.search_walks {
            debug!("search walks used up; retrying in place");
            return None;
        }
        match self.pick_anchor(obs.position, run) {
            Some(anchor) => {
                run.search_walks += 1;
                run.x_goal = anchor.x;
                run.searching = true;
                run.suppress_x = false;
                info!(anchor = %anchor.point(), walk = run.search_walks, "moving to another launch position");
            }
            None => debug!("no untried anchor on this level; retrying in place"),
        }
        None
    }

    /// Nearest-to-target anchor on the current level that has not been
    /// tried yet.
    fn pick_anchor(&self, position: Point, run: &Run) -> Option<Waypoint> {
        let graph = self.graph.as_ref()?;
        let spread = self.config.dead_band() * 2.0;
        graph
            .anchors()
            .filter(|a| (a.y - position.y).abs() <= self.config.y_tolerance)
            .filter(|a| !run.tried_x.iter().any(|x| (x - a.x).abs() < spread))
            .min_by(|a, b| {
                (a.x - run.target.x)
                    .abs()
                    .total_cmp(&(b.x - run.target.x).abs())
                    .then_with(|| (a.x - position.x).abs().total_cmp(&(b.x - position.x).abs()))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::RigConfig;
    use crate::vertical::VerticalKind;
    use glide_hal::sim::{SimConfig, SimWorld};
    use glide_types::Key;

    fn cfg() -> AdjusterConfig {
        AdjusterConfig::default()
    }

    fn input(x: f32, y: f32) -> TickInput {
        TickInput {
            position: Point::new(x, y),
            grounded: true,
            x_goal: 100.0,
            target_y: 100.0,
            suppress_x: false,
        }
    }

    fn graph() -> Arc<PlatformGraph> {
        let json = r#"{
            "nodes": [
                {"id": 0, "x": 20.0,  "y": 100.0},
                {"id": 1, "x": 100.0, "y": 100.0, "anchor": true},
                {"id": 2, "x": 130.0, "y": 100.0, "anchor": true},
                {"id": 3, "x": 60.0,  "y": 100.0, "anchor": true},
                {"id": 4, "x": 250.0, "y": 100.0},
                {"id": 5, "x": 100.0, "y": 70.0,  "anchor": true}
            ],
            "edges": [
                {"from": 0, "to": 3}, {"from": 3, "to": 1}, {"from": 1, "to": 2},
                {"from": 2, "to": 4}, {"from": 1, "to": 5}
            ]
        }"#;
        Arc::new(PlatformGraph::from_json(json).unwrap())
    }

    fn setup(at: Point) -> (SimWorld, Rig, Adjuster) {
        let world = SimWorld::new(SimConfig::default(), at);
        let rig = Rig::simulated(&world, RigConfig::default());
        let adjuster = Adjuster::new(cfg()).with_graph(graph());
        (world, rig, adjuster)
    }

    fn assert_keys_clean(world: &SimWorld, rig: &Rig) {
        assert!(world.held_keys().is_empty(), "still held: {:?}", world.held_keys());
        assert!(rig.keys().held_keys().is_empty());
        for key in ["left", "right", "up", "down", "alt", "c", "shift"] {
            assert!(rig.keys().peak_owners(&Key::new(key)) <= 1);
        }
    }

    // ── classify ────────────────────────────────────────────────────────────

    #[test]
    fn airborne_wins_over_everything() {
        let mut i = input(10.0, 40.0);
        i.grounded = false;
        assert_eq!(classify(&i, &cfg()), AdjustState::YRecovery);
    }

    #[test]
    fn horizontal_before_vertical() {
        assert_eq!(classify(&input(90.0, 70.0), &cfg()), AdjustState::XAdjust);
        assert_eq!(classify(&input(100.0, 70.0), &cfg()), AdjustState::YAdjust);
    }

    #[test]
    fn suppression_defers_horizontal() {
        let mut i = input(95.0, 70.0);
        i.suppress_x = true;
        assert_eq!(classify(&i, &cfg()), AdjustState::YAdjust);
        i.position.y = 100.0;
        assert_eq!(classify(&i, &cfg()), AdjustState::XAdjust);
    }

    #[test]
    fn dead_band_edges() {
        // 1.5 × quantum: 1.49 is inside, 1.5 is not.
        assert_eq!(classify(&input(98.51, 100.0), &cfg()), AdjustState::Settled);
        assert_eq!(classify(&input(98.5, 100.0), &cfg()), AdjustState::XAdjust);
        assert_eq!(classify(&input(100.0, 103.0), &cfg()), AdjustState::Settled);
    }

    #[test]
    fn x_policy_by_distance() {
        let c = cfg();
        assert_eq!(x_policy(100.0, true, &c), XPolicy::Walk);
        assert_eq!(x_policy(20.0, true, &c), XPolicy::BrakeThenWalk);
        assert_eq!(x_policy(5.0, true, &c), XPolicy::Tap);
        assert_eq!(x_policy(100.0, false, &c), XPolicy::Probe);
        assert_eq!(x_policy(5.0, false, &c), XPolicy::Tap);
    }

    // ── full runs ───────────────────────────────────────────────────────────

    #[test]
    fn inside_dead_band_settles_without_pressing() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        let report = adjuster.adjust(&mut rig, Point::new(101.0, 100.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
        assert_eq!(report.key_presses, 0);
        assert_eq!(world.total_presses(), 0);
    }

    #[test]
    fn far_target_settles_within_dead_band() {
        let (world, mut rig, adjuster) = setup(Point::new(20.0, 100.0));
        let report = adjuster.adjust(&mut rig, Point::new(200.0, 100.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
        assert!((report.position.x - 200.0).abs() < 1.5);
        assert!(report.x_corrections >= 1);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn near_target_uses_taps() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        let report = adjuster.adjust(&mut rig, Point::new(104.0, 100.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
        assert!((report.position.x - 104.0).abs() < 1.5);
        assert!(world.presses(&Key::new("right")) >= 1);
        assert_eq!(world.presses(&Key::new("left")), 0);
    }

    #[test]
    fn unknown_velocity_falls_back_to_fixed_pulses() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        rig.observe().unwrap();
        // Long enough without samples for the velocity estimate to reset.
        world.schedule_outage(Duration::from_millis(10)..Duration::from_millis(400));
        rig.sleep(Duration::from_millis(250)).unwrap();

        let report = adjuster.adjust(&mut rig, Point::new(160.0, 100.0)).unwrap();

        assert_eq!(report.status, TerminalStatus::Settled);
        // One fixed pulse covers a few pixels; a walk is still needed afterwards.
        assert!(report.x_corrections >= 2);
        assert!((world.true_position().x - 160.0).abs() < 1.5);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn sensor_outage_is_retried_then_settles() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        world.schedule_outage(Duration::from_millis(30)..Duration::from_millis(1_100));

        let report = adjuster.adjust(&mut rig, Point::new(104.0, 100.0)).unwrap();

        assert_eq!(report.status, TerminalStatus::Settled);
        assert_eq!(report.transient_retries, 1);
        assert!((report.position.x - 104.0).abs() < 1.5);
        assert!(rig.now() >= Duration::from_millis(1_100));
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn endless_outage_fails_as_sensor_stale() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        world.schedule_outage(Duration::from_millis(30)..Duration::from_secs(3_600));

        let report = adjuster.adjust(&mut rig, Point::new(104.0, 100.0)).unwrap();

        assert!(matches!(report.status, TerminalStatus::Failed(MoveError::SensorStale { .. })));
        assert_eq!(report.transient_retries, 3);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn climbs_two_levels() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        let report = adjuster.adjust(&mut rig, Point::new(100.0, 40.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
        assert_eq!(report.vertical_attempts, 2);
        assert!((world.true_position().y - 40.0).abs() < f32::EPSILON);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn teleport_primitive_goes_down() {
        let world = SimWorld::new(SimConfig::default(), Point::new(100.0, 40.0));
        let mut rig = Rig::simulated(&world, RigConfig::default());
        let mut config = cfg();
        config.vertical.kind = VerticalKind::Teleport;
        let adjuster = Adjuster::new(config);
        let report = adjuster.adjust(&mut rig, Point::new(100.0, 100.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
        assert_eq!(world.presses(&Key::new("shift")), 2);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn airborne_start_recovers_then_settles() {
        let (_world, mut rig, adjuster) = setup(Point::new(200.0, 50.0));
        let report = adjuster.adjust(&mut rig, Point::new(200.0, 100.0)).unwrap();
        assert_eq!(report.status, TerminalStatus::Settled);
    }

    #[test]
    fn local_failures_then_new_launch_position() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        world.fail_next_vertical(3);

        let report = adjuster.adjust(&mut rig, Point::new(100.0, 70.0)).unwrap();

        assert_eq!(report.status, TerminalStatus::Settled);
        assert_eq!(report.vertical_failures, 3);
        assert_eq!(report.search_walks, 1);
        let attempts = world.vertical_attempts();
        assert_eq!(attempts.len(), 4);
        // The first three share a launch position; the fourth does not.
        assert!(attempts[..3].iter().all(|a| (a.x - attempts[0].x).abs() < 1.5));
        assert!((attempts[3].x - attempts[0].x).abs() > 3.0);
        assert!((attempts[3].x - 130.0).abs() < 2.0);
        assert!(attempts[3].succeeded);
        assert!((report.position.x - 100.0).abs() < 1.5);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn cumulative_failures_exhaust() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        world.fail_next_vertical(100);

        let report = adjuster.adjust(&mut rig, Point::new(100.0, 70.0)).unwrap();

        assert!(matches!(
            report.status,
            TerminalStatus::Failed(MoveError::Exhaustion { attempts: 8, .. })
        ));
        assert_eq!(report.vertical_failures, 8);
        assert_eq!(report.search_walks, 2);
        assert_eq!(world.vertical_attempts().len(), 8);
        assert!((report.position.y - 100.0).abs() < f32::EPSILON);
        assert_keys_clean(&world, &rig);
    }

    #[test]
    fn without_graph_retries_in_place_until_exhausted() {
        let world = SimWorld::new(SimConfig::default(), Point::new(100.0, 100.0));
        let mut rig = Rig::simulated(&world, RigConfig::default());
        world.fail_next_vertical(100);
        let report = Adjuster::new(cfg()).adjust(&mut rig, Point::new(100.0, 70.0)).unwrap();
        assert!(!report.status.is_settled());
        assert_eq!(report.search_walks, 0);
        assert!(world.vertical_attempts().iter().all(|a| (a.x - 100.0).abs() < 1.5));
    }

    #[test]
    fn unreachable_level_exhausts() {
        // Nothing above x = 250.
        let (_world, mut rig, _) = setup(Point::new(250.0, 100.0));
        let report = Adjuster::new(cfg()).adjust(&mut rig, Point::new(250.0, 70.0)).unwrap();
        assert!(matches!(report.status, TerminalStatus::Failed(MoveError::Exhaustion { .. })));
    }

    /// Never moves; counts how often it was asked to.
    struct Inert(std::sync::Arc<std::sync::atomic::AtomicU32>);

    impl VerticalPrimitive for Inert {
        fn name(&self) -> &'static str {
            "inert"
        }

        fn execute(&self, _rig: &mut Rig, _direction: Direction) -> Result<VerticalOutcome, MoveError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(VerticalOutcome::NoEffect)
        }
    }

    #[test]
    fn custom_vertical_primitive_is_used() {
        let (world, mut rig, adjuster) = setup(Point::new(100.0, 100.0));
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let adjuster = adjuster.with_vertical(Box::new(Inert(calls.clone())));

        let report = adjuster.adjust(&mut rig, Point::new(100.0, 70.0)).unwrap();

        match report.status {
            TerminalStatus::Failed(MoveError::Exhaustion { operation, .. }) => assert_eq!(operation, "inert"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 8);
        assert!(world.vertical_attempts().is_empty());
    }

    #[test]
    fn cancelled_run_is_an_error_and_releases_keys() {
        let (world, mut rig, adjuster) = setup(Point::new(20.0, 100.0));
        rig.cancel_token().cancel();
        assert_eq!(adjuster.adjust(&mut rig, Point::new(200.0, 100.0)), Err(MoveError::Cancelled));
        assert!(world.held_keys().is_empty());
    }
}
