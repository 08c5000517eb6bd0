//! A one-shot wake-up gate handed to a waiter on `LockTable::acquire` and
//! opened by whichever transaction later releases the row it wants.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct GateInner {
    open: Mutex<bool>,
    cv: Condvar,
}

/// Handed back by `acquire` when the caller must block. Blocks the calling
/// thread until whoever holds the contested row releases it.
#[derive(Clone)]
pub struct Gate(Arc<GateInner>);

impl Gate {
    pub(crate) fn new() -> Self {
        Self(Arc::new(GateInner {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }))
    }

    /// Block until the gate is opened.
    pub fn wait(&self) {
        let mut open = self.0.open.lock();
        while !*open {
            self.0.cv.wait(&mut open);
        }
    }

    /// Block until the gate is opened or `timeout` elapses; returns
    /// whether the gate was observed open.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut open = self.0.open.lock();
        if *open {
            return true;
        }
        self.0.cv.wait_for(&mut open, timeout);
        *open
    }

    pub(crate) fn open(&self) {
        *self.0.open.lock() = true;
        self.0.cv.notify_all();
    }
}
