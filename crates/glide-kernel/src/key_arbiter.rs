//! [`KeyArbiter`] – the single interception point between every control
//! loop and the physical keyboard.
//!
//! Two independent guarantees are enforced here:
//!
//! 1. **Exclusive, scoped ownership.**  [`KeyArbiter::acquire`] presses a key
//!    and returns a [`KeyGuard`].  At most one guard per key is live at any
//!    time; a second `acquire` fails with [`MoveError::KeyConflict`] instead
//!    of silently taking the key over.  Dropping the guard releases the key,
//!    so every exit path of the acquiring scope (`?`, early return, panic)
//!    lets go of it.
//!
//! 2. **Nested shared-key suspension.**  Keys registered with
//!    [`KeyArbiter::hold_shared`] are held continuously (e.g. a mobbing attack
//!    key).  [`KeyArbiter::release_all`] physically releases them only on the
//!    transition from "none suspended" to "suspended", and
//!    [`KeyArbiter::restore_all`] re-presses them only when the outermost
//!    suspension ends.  Nested pairs below the outermost level are no-ops.
//!    A shared key still borrowed when the suspension ends is held again as
//!    soon as its borrower releases it.
//!    [`KeyArbiter::suspend_shared`] pairs the two in a [`SuspendGuard`].
//!
//! [`KeyArbiter::release_everything`] is the cancellation cleanup: it lets go
//! of every held key and invalidates outstanding guards, whose later drop
//! becomes a no-op.
//!
//! # Example
//!
//! ```
//! use glide_hal::sim::{SimConfig, SimWorld};
//! use glide_kernel::key_arbiter::{KeyArbiter, Owner};
//! use glide_types::{Key, Point};
//!
//! let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
//! let arbiter = KeyArbiter::new(world.clone());
//! let left = Key::new("left");
//!
//! {
//!     let _held = arbiter.acquire(&left, Owner::Mover).unwrap();
//!     // A second owner is refused rather than overriding the first.
//!     assert!(arbiter.acquire(&left, Owner::Scheduler).is_err());
//! }
//! // Guard dropped: the key is free again.
//! assert!(world.held_keys().is_empty());
//! assert_eq!(arbiter.live_owners(&left), 0);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use glide_hal::{Clock, KeyActuator};
use glide_types::{Key, MoveError};
use tracing::{debug, warn};

/// Logical owner of a held key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Mover,
    Adjuster,
    Scheduler,
    /// A continuously held shared key (see [`KeyArbiter::hold_shared`]).
    Shared,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Mover => write!(f, "mover"),
            Owner::Adjuster => write!(f, "adjuster"),
            Owner::Scheduler => write!(f, "scheduler"),
            Owner::Shared => write!(f, "shared"),
        }
    }
}

/// Physical event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyStats {
    pub physical_presses: u64,
    pub physical_releases: u64,
}

struct Holder {
    owner: Owner,
    token: u64,
}

struct ArbiterState {
    actuator: Box<dyn KeyActuator>,
    holders: HashMap<Key, Holder>,
    shared: BTreeSet<Key>,
    suspend_depth: u32,
    next_token: u64,
    live: HashMap<Key, usize>,
    peak: HashMap<Key, usize>,
    stats: KeyStats,
}

impl ArbiterState {
    fn press(&mut self, key: &Key, owner: Owner) -> Result<u64, MoveError> {
        self.actuator.press(key)?;
        self.stats.physical_presses += 1;
        self.next_token += 1;
        let token = self.next_token;
        self.holders.insert(key.clone(), Holder { owner, token });
        let live = self.live.entry(key.clone()).or_insert(0);
        *live += 1;
        let live = *live;
        let peak = self.peak.entry(key.clone()).or_insert(0);
        *peak = (*peak).max(live);
        Ok(token)
    }

    fn release(&mut self, key: &Key) -> Result<(), MoveError> {
        if self.holders.remove(key).is_some() {
            if let Some(live) = self.live.get_mut(key) {
                *live = live.saturating_sub(1);
            }
        }
        self.actuator.release(key)?;
        self.stats.physical_releases += 1;
        Ok(())
    }
}

/// Arbitrates physical keys between the Mover, the Adjuster, the
/// ActionScheduler and the shared-key registry.  Cheap to clone; every clone
/// talks to the same keyboard.
#[derive(Clone)]
pub struct KeyArbiter {
    state: Arc<Mutex<ArbiterState>>,
}

impl KeyArbiter {
    pub fn new(actuator: impl KeyActuator + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(ArbiterState {
                actuator: Box::new(actuator),
                holders: HashMap::new(),
                shared: BTreeSet::new(),
                suspend_depth: 0,
                next_token: 0,
                live: HashMap::new(),
                peak: HashMap::new(),
                stats: KeyStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Scoped ownership ────────────────────────────────────────────────────

    /// Press `key` on behalf of `owner` and return the guard that owns it.
    ///
    /// # Errors
    ///
    /// - [`MoveError::KeyConflict`] – the key is already owned.
    /// - [`MoveError::Hardware`] – the actuator rejected the press.
    pub fn acquire(&self, key: &Key, owner: Owner) -> Result<KeyGuard, MoveError> {
        let mut s = self.lock();
        if let Some(holder) = s.holders.get(key) {
            return Err(MoveError::KeyConflict {
                key: key.clone(),
                owner: holder.owner.to_string(),
            });
        }
        let token = s.press(key, owner)?;
        debug!(%key, %owner, "key acquired");
        Ok(KeyGuard {
            arbiter: self.clone(),
            key: key.clone(),
            token,
            released: false,
        })
    }

    /// Hold `key` for `hold`, then release it.
    pub fn tap(&self, key: &Key, owner: Owner, hold: Duration, clock: &dyn Clock) -> Result<(), MoveError> {
        let guard = self.acquire(key, owner)?;
        clock.sleep(hold);
        guard.release()
    }

    fn release_token(&self, key: &Key, token: u64) -> Result<(), MoveError> {
        let mut s = self.lock();
        match s.holders.get(key) {
            Some(holder) if holder.token == token => {
                let owner = holder.owner;
                debug!(%key, %owner, "key released");
                s.release(key)?;
                // A shared key borrowed across the end of its suspension.
                if owner != Owner::Shared && s.suspend_depth == 0 && s.shared.contains(key) {
                    debug!(%key, "re-holding shared key");
                    s.press(key, Owner::Shared)?;
                }
                Ok(())
            }
            // Invalidated by `release_everything`; the key is already up.
            _ => Ok(()),
        }
    }

    // ── Shared keys ─────────────────────────────────────────────────────────

    /// Register `key` as a continuously held shared key and press it unless
    /// shared keys are currently suspended.
    ///
    /// # Errors
    ///
    /// [`MoveError::KeyConflict`] if another owner holds the key right now.
    pub fn hold_shared(&self, key: &Key) -> Result<(), MoveError> {
        let mut s = self.lock();
        match s.holders.get(key) {
            Some(holder) if holder.owner == Owner::Shared => return Ok(()),
            Some(holder) => {
                return Err(MoveError::KeyConflict {
                    key: key.clone(),
                    owner: holder.owner.to_string(),
                });
            }
            None => {}
        }
        s.shared.insert(key.clone());
        if s.suspend_depth == 0 {
            s.press(key, Owner::Shared)?;
        }
        Ok(())
    }

    /// Unregister a shared key, releasing it if it is held.
    pub fn drop_shared(&self, key: &Key) -> Result<(), MoveError> {
        let mut s = self.lock();
        s.shared.remove(key);
        if s.holders.get(key).is_some_and(|h| h.owner == Owner::Shared) {
            s.release(key)?;
        }
        Ok(())
    }

    /// Enter one suspension level.  Shared keys are physically released only
    /// when entering the outermost level.
    pub fn release_all(&self) -> Result<(), MoveError> {
        let mut s = self.lock();
        s.suspend_depth += 1;
        if s.suspend_depth > 1 {
            debug!(depth = s.suspend_depth, "nested shared-key suspension");
            return Ok(());
        }
        let keys: Vec<Key> = s
            .shared
            .iter()
            .filter(|k| s.holders.get(*k).is_some_and(|h| h.owner == Owner::Shared))
            .cloned()
            .collect();
        let mut first_err = None;
        for key in keys {
            if let Err(e) = s.release(&key) {
                warn!(%key, error = %e, "failed to release shared key");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Leave one suspension level.  Shared keys are re-pressed only when the
    /// outermost level ends.  Calling this with no active suspension is a
    /// logged no-op.
    pub fn restore_all(&self) -> Result<(), MoveError> {
        let mut s = self.lock();
        if s.suspend_depth == 0 {
            warn!("restore_all without matching release_all");
            return Ok(());
        }
        s.suspend_depth -= 1;
        if s.suspend_depth > 0 {
            return Ok(());
        }
        let keys: Vec<Key> = s.shared.iter().cloned().collect();
        let mut first_err = None;
        for key in keys {
            if let Some(holder) = s.holders.get(&key) {
                debug!(%key, owner = %holder.owner, "shared key still borrowed; restored on its release");
                continue;
            }
            if let Err(e) = s.press(&key, Owner::Shared) {
                warn!(%key, error = %e, "failed to restore shared key");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// [`release_all`][Self::release_all] now, [`restore_all`][Self::restore_all]
    /// when the returned guard drops.
    pub fn suspend_shared(&self) -> Result<SuspendGuard, MoveError> {
        self.release_all()?;
        Ok(SuspendGuard {
            arbiter: self.clone(),
        })
    }

    pub fn suspend_depth(&self) -> u32 {
        self.lock().suspend_depth
    }

    // ── Emergency cleanup ───────────────────────────────────────────────────

    /// Release every held key, forget all shared keys and suspensions, and
    /// invalidate outstanding guards.
    pub fn release_everything(&self) {
        let mut s = self.lock();
        let keys: Vec<Key> = s.holders.keys().cloned().collect();
        for key in keys {
            if let Err(e) = s.release(&key) {
                warn!(%key, error = %e, "emergency release failed");
            }
        }
        s.shared.clear();
        s.suspend_depth = 0;
        s.holders.clear();
        s.live.clear();
        debug!("all keys released");
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn owner_of(&self, key: &Key) -> Option<Owner> {
        self.lock().holders.get(key).map(|h| h.owner)
    }

    /// Keys currently held, with their owners.
    pub fn held_keys(&self) -> Vec<(Key, Owner)> {
        let s = self.lock();
        let mut held: Vec<(Key, Owner)> = s.holders.iter().map(|(k, h)| (k.clone(), h.owner)).collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        held
    }

    /// Number of live ownerships of `key` (0 or 1).
    pub fn live_owners(&self, key: &Key) -> usize {
        self.lock().live.get(key).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous ownerships of `key` ever observed.
    pub fn peak_owners(&self, key: &Key) -> usize {
        self.lock().peak.get(key).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> KeyStats {
        self.lock().stats
    }
}

/// Exclusive ownership of one held key.  Releases the key on drop.
#[must_use = "dropping the guard releases the key immediately"]
pub struct KeyGuard {
    arbiter: KeyArbiter,
    key: Key,
    token: u64,
    released: bool,
}

impl KeyGuard {
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Release the key now and report any actuator error, which `Drop`
    /// can only log.
    pub fn release(mut self) -> Result<(), MoveError> {
        self.released = true;
        self.arbiter.release_token(&self.key, self.token)
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.arbiter.release_token(&self.key, self.token) {
            warn!(key = %self.key, error = %e, "key release on drop failed");
        }
    }
}

/// One shared-key suspension level.  Restores on drop.
#[must_use = "dropping the guard restores shared keys immediately"]
pub struct SuspendGuard {
    arbiter: KeyArbiter,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        if let Err(e) = self.arbiter.restore_all() {
            warn!(error = %e, "restoring shared keys failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_hal::sim::{SimConfig, SimWorld};
    use glide_types::Point;

    fn setup() -> (SimWorld, KeyArbiter) {
        let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
        let arbiter = KeyArbiter::new(world.clone());
        (world, arbiter)
    }

    /// Keyboard whose presses always fail.
    struct BrokenKeyboard;

    impl KeyActuator for BrokenKeyboard {
        fn press(&mut self, key: &Key) -> Result<(), MoveError> {
            Err(MoveError::Hardware {
                component: "keyboard".into(),
                details: format!("cannot press {key}"),
            })
        }
        fn release(&mut self, _key: &Key) -> Result<(), MoveError> {
            Ok(())
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        let (world, arbiter) = setup();
        let key = Key::new("left");
        {
            let guard = arbiter.acquire(&key, Owner::Adjuster).unwrap();
            assert_eq!(guard.key(), &key);
            assert_eq!(world.held_keys(), vec![key.clone()]);
            assert_eq!(arbiter.owner_of(&key), Some(Owner::Adjuster));
        }
        assert!(world.held_keys().is_empty());
        assert_eq!(arbiter.live_owners(&key), 0);
        assert_eq!(arbiter.peak_owners(&key), 1);
    }

    #[test]
    fn guard_releases_on_error_path() {
        let (world, arbiter) = setup();
        let key = Key::new("right");
        let run = || -> Result<(), MoveError> {
            let _guard = arbiter.acquire(&key, Owner::Mover)?;
            Err(MoveError::Cancelled)
        };
        assert_eq!(run(), Err(MoveError::Cancelled));
        assert!(world.held_keys().is_empty());
    }

    #[test]
    fn guard_releases_on_panic() {
        let (world, arbiter) = setup();
        let key = Key::new("right");
        let a = arbiter.clone();
        let k = key.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = a.acquire(&k, Owner::Mover).unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(world.held_keys().is_empty());
        assert_eq!(arbiter.live_owners(&key), 0);
    }

    #[test]
    fn second_owner_is_refused() {
        let (_world, arbiter) = setup();
        let key = Key::new("left");
        let _g = arbiter.acquire(&key, Owner::Mover).unwrap();
        let err = arbiter.acquire(&key, Owner::Scheduler).err().unwrap();
        assert!(matches!(err, MoveError::KeyConflict { ref owner, .. } if owner == "mover"));
        assert_eq!(arbiter.peak_owners(&key), 1);
    }

    #[test]
    fn failed_press_leaves_no_owner() {
        let arbiter = KeyArbiter::new(BrokenKeyboard);
        let key = Key::new("x");
        assert!(matches!(
            arbiter.acquire(&key, Owner::Scheduler),
            Err(MoveError::Hardware { .. })
        ));
        assert_eq!(arbiter.owner_of(&key), None);
        assert_eq!(arbiter.live_owners(&key), 0);
    }

    #[test]
    fn nested_release_restore_is_one_physical_pair() {
        let (world, arbiter) = setup();
        let attack = Key::new("ctrl");
        arbiter.hold_shared(&attack).unwrap();
        assert_eq!(world.presses(&attack), 1);

        arbiter.release_all().unwrap();
        arbiter.release_all().unwrap();
        arbiter.restore_all().unwrap();
        arbiter.restore_all().unwrap();

        assert_eq!(world.releases(&attack), 1);
        // One initial hold plus exactly one restore.
        assert_eq!(world.presses(&attack), 2);
        assert_eq!(world.held_keys(), vec![attack]);
        assert_eq!(arbiter.suspend_depth(), 0);
    }

    #[test]
    fn suspend_guard_restores_on_scope_exit() {
        let (world, arbiter) = setup();
        let attack = Key::new("ctrl");
        arbiter.hold_shared(&attack).unwrap();
        {
            let _outer = arbiter.suspend_shared().unwrap();
            {
                let _inner = arbiter.suspend_shared().unwrap();
                assert!(world.held_keys().is_empty());
            }
            // Inner restore is a no-op while the outer level is active.
            assert!(world.held_keys().is_empty());
        }
        assert_eq!(world.held_keys(), vec![attack.clone()]);
        assert_eq!(world.releases(&attack), 1);
    }

    #[test]
    fn suspended_shared_key_can_be_borrowed() {
        let (world, arbiter) = setup();
        let attack = Key::new("ctrl");
        arbiter.hold_shared(&attack).unwrap();
        assert!(arbiter.acquire(&attack, Owner::Scheduler).is_err());
        {
            let _suspended = arbiter.suspend_shared().unwrap();
            let borrowed = arbiter.acquire(&attack, Owner::Scheduler).unwrap();
            borrowed.release().unwrap();
        }
        assert_eq!(arbiter.owner_of(&attack), Some(Owner::Shared));
        assert_eq!(world.held_keys(), vec![attack.clone()]);
        assert_eq!(arbiter.peak_owners(&attack), 1);
    }

    #[test]
    fn shared_key_borrowed_past_suspension_is_held_again() {
        let (world, arbiter) = setup();
        let attack = Key::new("ctrl");
        arbiter.hold_shared(&attack).unwrap();

        let suspended = arbiter.suspend_shared().unwrap();
        let borrowed = arbiter.acquire(&attack, Owner::Scheduler).unwrap();
        drop(suspended);
        assert_eq!(arbiter.owner_of(&attack), Some(Owner::Scheduler));
        drop(borrowed);

        assert_eq!(arbiter.owner_of(&attack), Some(Owner::Shared));
        assert_eq!(world.held_keys(), vec![attack.clone()]);
        assert_eq!(arbiter.suspend_depth(), 0);
        assert_eq!(world.presses(&attack), 3);
        assert_eq!(arbiter.peak_owners(&attack), 1);
    }

    #[test]
    fn borrowed_shared_key_stays_up_while_suspended() {
        let (world, arbiter) = setup();
        let attack = Key::new("ctrl");
        arbiter.hold_shared(&attack).unwrap();
        let _outer = arbiter.suspend_shared().unwrap();
        arbiter.acquire(&attack, Owner::Scheduler).unwrap().release().unwrap();
        assert!(world.held_keys().is_empty());
        assert_eq!(arbiter.owner_of(&attack), None);
    }

    #[test]
    fn unmatched_restore_is_noop() {
        let (world, arbiter) = setup();
        arbiter.hold_shared(&Key::new("ctrl")).unwrap();
        arbiter.restore_all().unwrap();
        assert_eq!(world.presses(&Key::new("ctrl")), 1);
    }

    #[test]
    fn release_everything_invalidates_guards() {
        let (world, arbiter) = setup();
        let left = Key::new("left");
        let guard = arbiter.acquire(&left, Owner::Mover).unwrap();
        arbiter.hold_shared(&Key::new("ctrl")).unwrap();

        arbiter.release_everything();
        assert!(world.held_keys().is_empty());
        assert!(arbiter.held_keys().is_empty());

        // Someone else may take the key; the stale guard must not release it.
        let fresh = arbiter.acquire(&left, Owner::Adjuster).unwrap();
        drop(guard);
        assert_eq!(world.held_keys(), vec![left.clone()]);
        drop(fresh);
        assert!(world.held_keys().is_empty());
    }

    #[test]
    fn tap_presses_and_releases() {
        let (world, arbiter) = setup();
        let jump = Key::new("alt");
        arbiter
            .tap(&jump, Owner::Scheduler, Duration::from_millis(30), &world)
            .unwrap();
        assert_eq!(world.presses(&jump), 1);
        assert_eq!(world.releases(&jump), 1);
        assert_eq!(arbiter.stats().physical_presses, 1);
        assert_eq!(arbiter.stats().physical_releases, 1);
    }
}
