//! A hand-rolled read/write lock whose write side is acquired and released
//! across two separate calls (`before`/`after`) rather than scoped to one.
//! `parking_lot::RwLock`'s guard can't outlive a single call without
//! borrowing `self`, so the write side here is a manual acquire/release
//! pair instead of a guard object.

use parking_lot::{Condvar, Mutex};

struct State {
    readers: u32,
    writer: bool,
}

pub struct SlotLock {
    state: Mutex<State>,
    cv: Condvar,
}

impl SlotLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Scoped read access: many readers may hold this concurrently, but
    /// none while a writer holds the lock.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writer {
            self.cv.wait(&mut state);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Manually acquire exclusive access. Must be paired with a later
    /// `release_write` call (from `after`/`un_before`), not a guard.
    pub fn acquire_write(&self) {
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 {
            self.cv.wait(&mut state);
        }
        state.writer = true;
    }

    pub fn release_write(&self) {
        let mut state = self.state.lock();
        state.writer = false;
        self.cv.notify_all();
    }
}

impl Default for SlotLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadGuard<'a> {
    lock: &'a SlotLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.cv.notify_all();
        }
    }
}
