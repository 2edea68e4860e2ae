//! In-process simulated world for CI testing without a game client.
//!
//! [`SimWorld`] implements every hardware seam at once ([`KeyActuator`],
//! [`PositionSource`], [`Detector`], [`Clock`]) on top of a small platformer
//! physics model:
//!
//! - walking accelerates toward `walk_speed` and coasts to a stop under
//!   `friction` once the key is released (exact constant-acceleration
//!   integration, so the coast distance is `v² / 2f`);
//! - walking off a platform edge makes the agent fall to the platform below;
//! - the rope key climbs to the platform above, the teleport key jumps one
//!   platform up or down, down + jump drops through to the platform below,
//!   and the step key performs a fixed-length hop;
//! - position samples are produced every `sample_interval`, describe the
//!   world as it was `capture_latency` ago, and are quantized to `quantum`.
//!
//! Time only advances through [`Clock::sleep`], which makes every control
//! loop driven by a `SimWorld` fully deterministic.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use glide_hal::keyboard::KeyActuator;
//! use glide_hal::position::Clock;
//! use glide_hal::sim::{SimConfig, SimWorld};
//! use glide_types::{Key, Point};
//!
//! let mut world = SimWorld::new(SimConfig::default(), Point::new(20.0, 100.0));
//! world.press(&Key::new("right")).unwrap();
//! world.sleep(Duration::from_millis(500));
//! world.release(&Key::new("right")).unwrap();
//! world.sleep(Duration::from_millis(500));
//! assert!(world.true_position().x > 50.0);
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use glide_types::{Key, KeyBindings, MoveError, Point, PositionSample};

use crate::keyboard::KeyActuator;
use crate::position::{Clock, Detector, PositionSource};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// A horizontal platform spanning `x_min..=x_max` at height `y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimPlatform {
    pub y: f32,
    pub x_min: f32,
    pub x_max: f32,
}

impl SimPlatform {
    pub const fn new(y: f32, x_min: f32, x_max: f32) -> Self {
        Self { y, x_min, x_max }
    }

    fn contains_x(&self, x: f32) -> bool {
        x >= self.x_min && x <= self.x_max
    }
}

/// Tunables for the simulated world.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub bindings: KeyBindings,
    /// Top walking speed (px/s).
    pub walk_speed: f32,
    /// Acceleration while a direction key is held (px/s²).
    pub acceleration: f32,
    /// Deceleration once no direction key is held (px/s²).
    pub friction: f32,
    pub fall_speed: f32,
    pub climb_speed: f32,
    pub teleport_delay: Duration,
    pub step_distance: f32,
    pub step_duration: Duration,
    pub physics_step: Duration,
    pub sample_interval: Duration,
    pub capture_latency: Duration,
    pub quantum: f32,
    pub platforms: Vec<SimPlatform>,
}

impl SimConfig {
    /// Distance the agent slides after releasing a key at `speed`.
    pub fn coast_distance(&self, speed: f32) -> f32 {
        speed * speed / (2.0 * self.friction)
    }

    /// Coast time as the control loop models it: `coast_distance / speed`.
    pub fn effective_coast_time(&self, speed: f32) -> f32 {
        if speed <= f32::EPSILON {
            0.0
        } else {
            self.coast_distance(speed) / speed
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bindings: KeyBindings::default(),
            walk_speed: 100.0,
            acceleration: 1000.0,
            friction: 800.0,
            fall_speed: 150.0,
            climb_speed: 60.0,
            teleport_delay: Duration::from_millis(100),
            step_distance: 30.0,
            step_duration: Duration::from_millis(300),
            physics_step: Duration::from_millis(10),
            sample_interval: Duration::from_millis(20),
            capture_latency: Duration::from_millis(40),
            quantum: 1.0,
            platforms: vec![
                SimPlatform::new(100.0, 0.0, 300.0),
                SimPlatform::new(70.0, 40.0, 160.0),
                SimPlatform::new(40.0, 60.0, 140.0),
            ],
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recorded events
// ────────────────────────────────────────────────────────────────────────────

/// One rope-climb or teleport attempt, as seen by the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalAttempt {
    pub at: Duration,
    pub x: f32,
    pub y: f32,
    pub succeeded: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// World state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Grounded(usize),
    Falling,
    Climbing { target: usize },
    Teleporting { remaining: Duration, target: usize },
    Stepping { remaining: Duration, speed: f32 },
}

struct SimState {
    config: SimConfig,
    now: Duration,
    position: Point,
    vx: f32,
    motion: Motion,
    alive: bool,
    sampling: bool,
    /// No samples are produced while the clock is inside this window.
    outage: Option<Range<Duration>>,
    held: BTreeSet<Key>,
    presses: HashMap<Key, u32>,
    releases: HashMap<Key, u32>,
    history: VecDeque<(Duration, Point)>,
    next_sample_at: Duration,
    last_sample: Option<PositionSample>,
    vertical_failures: u32,
    step_failures: u32,
    vertical_attempts: Vec<VerticalAttempt>,
}

/// Shared handle to a simulated world.  Cloning yields another handle to the
/// same world.
#[derive(Clone)]
pub struct SimWorld {
    state: Arc<Mutex<SimState>>,
}

impl SimWorld {
    /// Create a world with the agent at `start`.  The agent starts grounded
    /// if a platform lies at `start.y` under `start.x`, otherwise falling.
    pub fn new(config: SimConfig, start: Point) -> Self {
        let motion = config
            .platforms
            .iter()
            .position(|p| (p.y - start.y).abs() < 0.01 && p.contains_x(start.x))
            .map_or(Motion::Falling, Motion::Grounded);
        let first = PositionSample {
            x: quantize(start.x, config.quantum),
            y: quantize(start.y, config.quantum),
            t: Duration::ZERO,
            confidence: 1.0,
        };
        let next_sample_at = config.sample_interval;
        let mut history = VecDeque::new();
        history.push_back((Duration::ZERO, start));
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                now: Duration::ZERO,
                position: start,
                vx: 0.0,
                motion,
                alive: true,
                sampling: true,
                outage: None,
                held: BTreeSet::new(),
                presses: HashMap::new(),
                releases: HashMap::new(),
                history,
                next_sample_at,
                last_sample: Some(first),
                vertical_failures: 0,
                step_failures: 0,
                vertical_attempts: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> SimConfig {
        self.lock().config.clone()
    }

    /// Ground-truth position (not delayed, not quantized).
    pub fn true_position(&self) -> Point {
        self.lock().position
    }

    pub fn velocity_x(&self) -> f32 {
        self.lock().vx
    }

    pub fn held_keys(&self) -> Vec<Key> {
        self.lock().held.iter().cloned().collect()
    }

    /// Number of physical presses of `key` so far.
    pub fn presses(&self, key: &Key) -> u32 {
        self.lock().presses.get(key).copied().unwrap_or(0)
    }

    pub fn releases(&self, key: &Key) -> u32 {
        self.lock().releases.get(key).copied().unwrap_or(0)
    }

    pub fn total_presses(&self) -> u32 {
        self.lock().presses.values().sum()
    }

    pub fn vertical_attempts(&self) -> Vec<VerticalAttempt> {
        self.lock().vertical_attempts.clone()
    }

    /// Make the next `count` rope/teleport attempts have no effect.
    pub fn fail_next_vertical(&self, count: u32) {
        self.lock().vertical_failures = count;
    }

    /// Make the next `count` step hops have no effect.
    pub fn fail_next_steps(&self, count: u32) {
        self.lock().step_failures = count;
    }

    pub fn set_alive(&self, alive: bool) {
        self.lock().alive = alive;
    }

    /// Stop or resume producing position samples (simulates a lost minimap).
    pub fn set_sampling(&self, enabled: bool) {
        self.lock().sampling = enabled;
    }

    /// Stop producing samples while the simulated clock is inside `window`.
    /// Lets a test freeze the stream partway through a synchronous run.
    pub fn schedule_outage(&self, window: Range<Duration>) {
        self.lock().outage = Some(window);
    }

    /// Teleport the agent without physics, e.g. to stage a test.
    pub fn place(&self, at: Point) {
        let mut s = self.lock();
        s.position = at;
        s.vx = 0.0;
        s.motion = s
            .config
            .platforms
            .iter()
            .position(|p| (p.y - at.y).abs() < 0.01 && p.contains_x(at.x))
            .map_or(Motion::Falling, Motion::Grounded);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Physics
// ────────────────────────────────────────────────────────────────────────────

fn quantize(value: f32, quantum: f32) -> f32 {
    if quantum <= 0.0 {
        value
    } else {
        (value / quantum).round() * quantum
    }
}

/// Move `v` toward `target` at `rate` for `dt` seconds under constant
/// acceleration.  Returns `(displacement, new_velocity)`.
fn integrate(v: f32, target: f32, rate: f32, dt: f32) -> (f32, f32) {
    let gap = target - v;
    if rate <= 0.0 {
        return (v * dt, v);
    }
    let t_reach = gap.abs() / rate;
    if t_reach <= dt {
        let dx = (v + target) * 0.5 * t_reach + target * (dt - t_reach);
        (dx, target)
    } else {
        let v1 = v + gap.signum() * rate * dt;
        ((v + v1) * 0.5 * dt, v1)
    }
}

impl SimState {
    fn platform_under(&self, x: f32, from_y: f32, to_y: f32) -> Option<usize> {
        self.config
            .platforms
            .iter()
            .enumerate()
            .filter(|(_, p)| p.contains_x(x) && p.y >= from_y && p.y <= to_y)
            .min_by(|a, b| a.1.y.total_cmp(&b.1.y))
            .map(|(i, _)| i)
    }

    /// Closest platform strictly above (`up = true`) or below the agent that
    /// spans its current `x`.
    fn neighbour_platform(&self, up: bool) -> Option<usize> {
        let Point { x, y } = self.position;
        let candidates = self
            .config
            .platforms
            .iter()
            .enumerate()
            .filter(|(_, p)| p.contains_x(x))
            .filter(|(_, p)| if up { p.y < y - 0.5 } else { p.y > y + 0.5 });
        if up {
            candidates.max_by(|a, b| a.1.y.total_cmp(&b.1.y)).map(|(i, _)| i)
        } else {
            candidates.min_by(|a, b| a.1.y.total_cmp(&b.1.y)).map(|(i, _)| i)
        }
    }

    fn horizontal_intent(&self) -> f32 {
        let left = self.held.contains(&self.config.bindings.left);
        let right = self.held.contains(&self.config.bindings.right);
        match (left, right) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }

    fn step(&mut self, dt: Duration) {
        let dts = dt.as_secs_f32();
        match self.motion {
            Motion::Grounded(idx) => {
                let intent = self.horizontal_intent();
                let target_v = intent * self.config.walk_speed;
                let rate = if intent == 0.0 {
                    self.config.friction
                } else {
                    self.config.acceleration
                };
                let (dx, v) = integrate(self.vx, target_v, rate, dts);
                self.position.x += dx;
                self.vx = v;
                if !self.config.platforms[idx].contains_x(self.position.x) {
                    self.motion = Motion::Falling;
                }
            }
            Motion::Falling => {
                let (dx, v) = integrate(self.vx, 0.0, self.config.friction, dts);
                self.position.x += dx;
                self.vx = v;
                let from = self.position.y;
                let to = from + self.config.fall_speed * dts;
                match self.platform_under(self.position.x, from, to) {
                    Some(idx) => {
                        self.position.y = self.config.platforms[idx].y;
                        self.vx = 0.0;
                        self.motion = Motion::Grounded(idx);
                    }
                    None => {
                        self.position.y = to;
                        let lowest = self
                            .config
                            .platforms
                            .iter()
                            .map(|p| p.y)
                            .fold(f32::MIN, f32::max);
                        if self.position.y > lowest + 500.0 {
                            self.alive = false;
                        }
                    }
                }
            }
            Motion::Climbing { target } => {
                self.vx = 0.0;
                let target_y = self.config.platforms[target].y;
                self.position.y -= self.config.climb_speed * dts;
                if self.position.y <= target_y {
                    self.position.y = target_y;
                    self.motion = Motion::Grounded(target);
                }
            }
            Motion::Teleporting { remaining, target } => {
                let remaining = remaining.saturating_sub(dt);
                if remaining.is_zero() {
                    self.position.y = self.config.platforms[target].y;
                    self.vx = 0.0;
                    self.motion = Motion::Grounded(target);
                } else {
                    self.motion = Motion::Teleporting { remaining, target };
                }
            }
            Motion::Stepping { remaining, speed } => {
                self.position.x += speed * dts;
                let remaining = remaining.saturating_sub(dt);
                if remaining.is_zero() {
                    self.vx = 0.0;
                    let y = self.position.y;
                    self.motion = match self.platform_under(self.position.x, y, y) {
                        Some(idx) => Motion::Grounded(idx),
                        None => Motion::Falling,
                    };
                } else {
                    self.motion = Motion::Stepping { remaining, speed };
                }
            }
        }

        self.now += dt;
        self.history.push_back((self.now, self.position));
        while self
            .history
            .front()
            .is_some_and(|(t, _)| self.now.saturating_sub(*t) > Duration::from_secs(2))
        {
            self.history.pop_front();
        }
        self.maybe_sample();
    }

    fn maybe_sample(&mut self) {
        if !self.sampling || self.now < self.next_sample_at {
            return;
        }
        if self.outage.as_ref().is_some_and(|w| w.contains(&self.now)) {
            return;
        }
        while self.next_sample_at <= self.now {
            self.next_sample_at += self.config.sample_interval;
        }
        let t = self.now.saturating_sub(self.config.capture_latency);
        if self.last_sample.is_some_and(|s| t <= s.t) {
            return;
        }
        let seen = self
            .history
            .iter()
            .rev()
            .find(|(at, _)| *at <= t)
            .or_else(|| self.history.front())
            .map(|(_, p)| *p)
            .unwrap_or(self.position);
        self.last_sample = Some(PositionSample {
            x: quantize(seen.x, self.config.quantum),
            y: quantize(seen.y, self.config.quantum),
            t,
            confidence: 1.0,
        });
    }

    fn on_press(&mut self, key: &Key) {
        let Motion::Grounded(_) = self.motion else {
            return;
        };
        let bindings = self.config.bindings.clone();
        let intent = self.horizontal_intent();
        if *key == bindings.jump && intent == 0.0 && self.held.contains(&bindings.down) {
            self.drop_through();
        } else if *key == bindings.rope {
            self.attempt_vertical(true, false);
        } else if *key == bindings.teleport {
            let up = !self.held.contains(&bindings.down);
            self.attempt_vertical(up, true);
        } else if *key == bindings.step {
            if intent == 0.0 {
                return;
            }
            if self.step_failures > 0 {
                self.step_failures -= 1;
                return;
            }
            let secs = self.config.step_duration.as_secs_f32().max(f32::EPSILON);
            self.motion = Motion::Stepping {
                remaining: self.config.step_duration,
                speed: intent * self.config.step_distance / secs,
            };
        }
    }

    /// Down + jump: fall through to the platform below, if there is one.
    fn drop_through(&mut self) {
        let below = self.neighbour_platform(false);
        self.vertical_attempts.push(VerticalAttempt {
            at: self.now,
            x: self.position.x,
            y: self.position.y,
            succeeded: below.is_some(),
        });
        if below.is_some() {
            self.position.y += 0.5;
            self.vx = 0.0;
            self.motion = Motion::Falling;
        }
    }

    fn attempt_vertical(&mut self, up: bool, teleport: bool) {
        let target = if self.vertical_failures > 0 {
            self.vertical_failures -= 1;
            None
        } else {
            self.neighbour_platform(up)
        };
        self.vertical_attempts.push(VerticalAttempt {
            at: self.now,
            x: self.position.x,
            y: self.position.y,
            succeeded: target.is_some(),
        });
        if let Some(target) = target {
            self.vx = 0.0;
            self.motion = if teleport {
                Motion::Teleporting {
                    remaining: self.config.teleport_delay,
                    target,
                }
            } else {
                Motion::Climbing { target }
            };
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait impls
// ────────────────────────────────────────────────────────────────────────────

impl KeyActuator for SimWorld {
    fn press(&mut self, key: &Key) -> Result<(), MoveError> {
        let mut s = self.lock();
        if s.held.insert(key.clone()) {
            *s.presses.entry(key.clone()).or_insert(0) += 1;
            s.on_press(key);
        }
        Ok(())
    }

    fn release(&mut self, key: &Key) -> Result<(), MoveError> {
        let mut s = self.lock();
        if s.held.remove(key) {
            *s.releases.entry(key.clone()).or_insert(0) += 1;
        }
        Ok(())
    }
}

impl PositionSource for SimWorld {
    fn get_latest(&self) -> Option<PositionSample> {
        self.lock().last_sample
    }
}

impl Detector for SimWorld {
    fn is_grounded(&self) -> bool {
        matches!(self.lock().motion, Motion::Grounded(_))
    }

    fn is_alive(&self) -> bool {
        self.lock().alive
    }
}

impl Clock for SimWorld {
    fn now(&self) -> Duration {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut s = self.lock();
        let mut remaining = duration;
        while !remaining.is_zero() {
            let dt = remaining.min(s.config.physics_step);
            s.step(dt);
            remaining -= dt;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
