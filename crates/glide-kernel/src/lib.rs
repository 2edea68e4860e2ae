//! `glide-kernel` – Key safety & bookkeeping
//!
//! Sits between the control loops and the keyboard.  It does not decide
//! where to go; it enforces the rules every loop must obey while getting
//! there.
//!
//! # Modules
//!
//! - [`key_arbiter`] – [`KeyArbiter`][key_arbiter::KeyArbiter]: the single
//!   interception point for physical keys.  Scoped [`KeyGuard`]s give at
//!   most one owner per key and release on every exit path; shared keys are
//!   suspended and restored with nesting-aware reference counting.
//! - [`cooldown`] – [`CooldownLedger`][cooldown::CooldownLedger]: last-use
//!   bookkeeping for cooldown-gated actions.
//! - [`cancel`] – [`CancelToken`][cancel::CancelToken]: cooperative
//!   cancellation polled by every loop between primitives.

pub mod cancel;
pub mod cooldown;
pub mod key_arbiter;

pub use cancel::CancelToken;
pub use cooldown::{CooldownLedger, CooldownState};
pub use key_arbiter::{KeyArbiter, KeyGuard, KeyStats, Owner, SuspendGuard};
