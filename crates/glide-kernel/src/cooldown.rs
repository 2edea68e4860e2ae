//! [`CooldownLedger`] – last-use bookkeeping for cooldown-gated actions.
//!
//! Every gated action records its use under a cooldown key.  Before the next
//! invocation the scheduler asks the ledger whether `last_use + cooldown` has
//! elapsed.  Several actions may share one cooldown key (e.g. two bindings of
//! the same buff).
//!
//! Time is passed in explicitly so that the ledger works with any
//! [`Clock`][glide_hal::Clock], simulated or real.

use std::collections::HashMap;
use std::time::Duration;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Readiness of a cooldown key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownState {
    /// Never used, or the cooldown has elapsed.
    Ready,
    /// Still cooling down for the contained duration.
    CoolingDown(Duration),
}

// ────────────────────────────────────────────────────────────────────────────
// CooldownLedger
// ────────────────────────────────────────────────────────────────────────────

/// Maps cooldown keys to the time they were last used.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use glide_kernel::cooldown::{CooldownLedger, CooldownState};
///
/// let mut ledger = CooldownLedger::new();
/// let cd = Duration::from_secs(30);
/// assert_eq!(ledger.state("buff", cd, Duration::from_secs(1)), CooldownState::Ready);
///
/// ledger.record("buff", Duration::from_secs(1));
/// assert_eq!(
///     ledger.state("buff", cd, Duration::from_secs(11)),
///     CooldownState::CoolingDown(Duration::from_secs(20))
/// );
/// ```
#[derive(Debug, Default, Clone)]
pub struct CooldownLedger {
    last_use: HashMap<String, Duration>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use of `key` at `now`, restarting its cooldown.
    pub fn record(&mut self, key: &str, now: Duration) {
        self.last_use.insert(key.to_string(), now);
    }

    /// Time `key` was last used, if ever.
    pub fn last_use(&self, key: &str) -> Option<Duration> {
        self.last_use.get(key).copied()
    }

    /// Remaining cooldown for `key` as of `now`; zero when ready.
    pub fn remaining(&self, key: &str, cooldown: Duration, now: Duration) -> Duration {
        match self.last_use.get(key) {
            Some(last) => (*last + cooldown).saturating_sub(now),
            None => Duration::ZERO,
        }
    }

    pub fn state(&self, key: &str, cooldown: Duration, now: Duration) -> CooldownState {
        let remaining = self.remaining(key, cooldown, now);
        if remaining.is_zero() {
            CooldownState::Ready
        } else {
            CooldownState::CoolingDown(remaining)
        }
    }

    pub fn is_ready(&self, key: &str, cooldown: Duration, now: Duration) -> bool {
        self.remaining(key, cooldown, now).is_zero()
    }

    /// Forget `key`, making it immediately ready.
    pub fn clear(&mut self, key: &str) {
        self.last_use.remove(key);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CD: Duration = Duration::from_secs(10);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn unknown_key_is_ready() {
        let ledger = CooldownLedger::new();
        assert!(ledger.is_ready("ghost", CD, secs(0)));
        assert_eq!(ledger.last_use("ghost"), None);
    }

    #[test]
    fn key_cools_down_after_use() {
        let mut ledger = CooldownLedger::new();
        ledger.record("haste", secs(100));
        assert!(!ledger.is_ready("haste", CD, secs(105)));
        assert_eq!(ledger.remaining("haste", CD, secs(105)), secs(5));
    }

    #[test]
    fn cooldown_boundary_is_ready() {
        let mut ledger = CooldownLedger::new();
        ledger.record("haste", secs(100));
        assert!(ledger.is_ready("haste", CD, secs(110)));
        assert_eq!(ledger.state("haste", CD, secs(200)), CooldownState::Ready);
    }

    #[test]
    fn re_recording_restarts_the_window() {
        let mut ledger = CooldownLedger::new();
        ledger.record("haste", secs(0));
        ledger.record("haste", secs(8));
        assert!(!ledger.is_ready("haste", CD, secs(12)));
    }

    #[test]
    fn keys_are_independent() {
        let mut ledger = CooldownLedger::new();
        ledger.record("a", secs(0));
        assert!(ledger.is_ready("b", CD, secs(1)));
    }

    #[test]
    fn clear_makes_key_ready() {
        let mut ledger = CooldownLedger::new();
        ledger.record("a", secs(0));
        ledger.clear("a");
        assert!(ledger.is_ready("a", CD, secs(1)));
    }
}
