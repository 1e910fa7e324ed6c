//! Cooperative cancellation.
//!
//! One [`Cancel`] handle is shared by the sync driver, the appliers and
//! the Wasm metering hooks. Appliers check it between entries and before
//! any external fetch; the VM checks it on every metered host call and
//! from its epoch-interruption hook, so an in-flight contract call aborts
//! promptly instead of running out its fuel budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag. Cloning hands out another observer of the
/// same signal.
#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
