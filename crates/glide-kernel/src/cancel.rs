//! Cooperative cancellation shared by every control loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glide_types::MoveError;

/// Cloneable cancellation flag.  Loops poll it between primitives; the
/// first check after [`cancel`][CancelToken::cancel] returns
/// [`MoveError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// # Errors
    ///
    /// [`MoveError::Cancelled`] once the token has been cancelled.
    pub fn check(&self) -> Result<(), MoveError> {
        if self.is_cancelled() {
            Err(MoveError::Cancelled)
        } else {
            Ok(())
        }
    }
}
