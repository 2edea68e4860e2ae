//! Generic `KeyActuator` trait for anything that can hold a key down.
//!
//! Drivers (an OS input-injection backend, a remote HID bridge, the
//! [`SimWorld`][crate::sim::SimWorld]) implement this trait and are handed to
//! the key-safety layer in `glide-kernel`.  Nothing outside that layer talks
//! to a driver directly, so drivers can be swapped without touching any
//! movement logic.

use glide_types::{Key, MoveError};

/// A physical key press/release backend.
///
/// Implementations only have to be idempotent per call: pressing an
/// already-held key or releasing a free key must not fail.  Ownership and
/// nesting rules live in `glide_kernel::KeyArbiter`.
pub trait KeyActuator: Send + Sync {
    /// Push `key` down and keep it held.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Hardware`] if the backend rejected the event.
    fn press(&mut self, key: &Key) -> Result<(), MoveError>;

    /// Let `key` go.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Hardware`] if the backend rejected the event.
    fn release(&mut self, key: &Key) -> Result<(), MoveError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimWorld};
    use glide_types::Point;

    fn world() -> SimWorld {
        SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0))
    }

    #[test]
    fn repeated_press_and_release_are_idempotent() {
        let world = world();
        let mut kb = world.clone();
        let left = Key::new("left");

        kb.press(&left).unwrap();
        kb.press(&left).unwrap();
        assert_eq!(world.held_keys(), vec![left.clone()]);
        assert_eq!(world.presses(&left), 1);

        kb.release(&left).unwrap();
        kb.release(&left).unwrap();
        assert!(world.held_keys().is_empty());
        assert_eq!(world.releases(&left), 1);
    }

    #[test]
    fn boxed_driver_is_usable_through_trait_object() {
        let world = world();
        let mut kb: Box<dyn KeyActuator> = Box::new(world.clone());
        // Releasing a free key is not an error.
        kb.release(&Key::new("alt")).unwrap();
        kb.press(&Key::new("ctrl")).unwrap();
        assert_eq!(world.held_keys(), vec![Key::new("ctrl")]);
        kb.release(&Key::new("ctrl")).unwrap();
        assert_eq!(world.total_presses(), 1);
    }
}
