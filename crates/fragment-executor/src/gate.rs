//! Single-shot gate for external events.
//!
//! External callers (cancel, early termination) wait on the gate before
//! touching the operator tree. Once it is open the tree is either fully
//! built or will never be built. Waiting cannot be cancelled: callers rely
//! on the blocking as an ordering guarantee, not as work to abandon.

use parking_lot::{Condvar, Mutex};

/// One-shot broadcast signal.
#[derive(Debug, Default)]
pub struct EventGate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and release all waiters. Opening again is a no-op.
    pub fn open(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.opened.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until the gate is open. Returns immediately if it already is.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}
