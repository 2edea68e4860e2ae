use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position in screen (minimap) coordinates.
///
/// `y` grows downward, so "up" means a smaller `y`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Straight-line distance to `other`.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// One observed position, as produced by the detection pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    /// Capture time, measured from the clock's epoch.
    pub t: Duration,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
}

impl PositionSample {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A physical key identifier, e.g. `"left"` or `"jump"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Cardinal movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Horizontal direction that reduces `error` (`target - current`).
    pub fn toward_x(error: f32) -> Self {
        if error >= 0.0 { Direction::Right } else { Direction::Left }
    }

    /// Vertical direction that reduces `error` (`target - current`), with
    /// `y` growing downward.
    pub fn toward_y(error: f32) -> Self {
        if error >= 0.0 { Direction::Down } else { Direction::Up }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// `+1.0` for right/down, `-1.0` for left/up.
    pub fn sign(self) -> f32 {
        match self {
            Direction::Right | Direction::Down => 1.0,
            Direction::Left | Direction::Up => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Key bindings used by the movement subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub left: Key,
    pub right: Key,
    pub up: Key,
    pub down: Key,
    pub jump: Key,
    /// Rope-lift / climb skill.
    pub rope: Key,
    pub teleport: Key,
    /// Long horizontal hop (e.g. flash jump).
    pub step: Key,
}

impl KeyBindings {
    pub fn direction(&self, direction: Direction) -> &Key {
        match direction {
            Direction::Left => &self.left,
            Direction::Right => &self.right,
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            left: Key::new("left"),
            right: Key::new("right"),
            up: Key::new("up"),
            down: Key::new("down"),
            jump: Key::new("alt"),
            rope: Key::new("c"),
            teleport: Key::new("shift"),
            step: Key::new("alt"),
        }
    }
}

/// Failure taxonomy shared by every control loop.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoveError {
    #[error("Sensor stale: no fresh position for {waited:?}")]
    SensorStale { waited: Duration },

    #[error("Actuation failure during {action}: {details}")]
    ActuationFailure { action: String, details: String },

    #[error("Planning failure: {0}")]
    PlanningFailure(String),

    #[error("Calibration divergence: observed coast {observed:.3}s outside trusted band {min:.3}..{max:.3}s")]
    CalibrationDivergence { observed: f32, min: f32, max: f32 },

    #[error("Timeout after {after:?} while {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Retry budget exhausted for {operation} after {attempts} attempts")]
    Exhaustion { operation: String, attempts: u32 },

    #[error("Key '{key}' is already owned by {owner}")]
    KeyConflict { key: Key, owner: String },

    #[error("Hardware Fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Cancelled")]
    Cancelled,
}

impl MoveError {
    /// Transient failures are worth a bounded local retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MoveError::SensorStale { .. } | MoveError::ActuationFailure { .. }
        )
    }

    /// Fatal failures abort the whole run and are returned as `Err` instead
    /// of being folded into a [`TerminalStatus`].
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MoveError::Cancelled | MoveError::Hardware { .. } | MoveError::KeyConflict { .. }
        )
    }
}

/// Terminal status of a move, adjust, or action run.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalStatus {
    Settled,
    Failed(MoveError),
}

impl TerminalStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TerminalStatus::Settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_serializes_as_plain_string() {
        let key = Key::new("left");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"left\"");
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn direction_toward_follows_screen_axes() {
        assert_eq!(Direction::toward_x(5.0), Direction::Right);
        assert_eq!(Direction::toward_x(-0.1), Direction::Left);
        // y grows downward: a negative error means the target is above.
        assert_eq!(Direction::toward_y(-3.0), Direction::Up);
        assert_eq!(Direction::toward_y(3.0), Direction::Down);
        assert_eq!(Direction::Left.opposite(), Direction::Right);
        assert!((Direction::Up.sign() + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn key_bindings_partial_config_uses_defaults() {
        let bindings: KeyBindings = serde_json::from_str(r#"{"rope": "v"}"#).unwrap();
        assert_eq!(bindings.rope, Key::new("v"));
        assert_eq!(bindings.left, Key::new("left"));
        assert_eq!(bindings.direction(Direction::Right), &Key::new("right"));
    }

    #[test]
    fn move_error_display() {
        let err = MoveError::Exhaustion {
            operation: "rope climb".to_string(),
            attempts: 8,
        };
        assert!(err.to_string().contains("rope climb"));
        assert!(err.to_string().contains('8'));

        let err = MoveError::KeyConflict {
            key: Key::new("left"),
            owner: "mover".to_string(),
        };
        assert!(err.to_string().contains("left"));
    }

    #[test]
    fn transient_classification() {
        assert!(MoveError::SensorStale { waited: Duration::from_millis(200) }.is_transient());
        assert!(!MoveError::Cancelled.is_transient());
        assert!(!MoveError::PlanningFailure("unreachable".into()).is_transient());
    }

    #[test]
    fn fatal_classification() {
        assert!(MoveError::Cancelled.is_fatal());
        assert!(
            MoveError::Hardware {
                component: "keyboard".into(),
                details: "unplugged".into()
            }
            .is_fatal()
        );
        assert!(!MoveError::Timeout { operation: "settle".into(), after: Duration::from_secs(1) }.is_fatal());
    }

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }
}
