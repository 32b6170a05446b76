//! Manual-reset event with timed wait.
//!
//! The pty core wakes blocked slave readers through one of these per tty.
//! Semantics follow the classic manual-reset event: once set, every waiter
//! is released and the event stays signaled until explicitly reset.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A manual-reset event.
pub struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signal the event, releasing all current and future waiters.
    pub fn set(&self) {
        let mut signaled = self.state.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Return the event to the non-signaled state.
    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    /// Point-in-time check without waiting.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Wait until the event is signaled.
    ///
    /// `timeout` of `None` blocks indefinitely. Returns `true` if the
    /// event was signaled, `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.state.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.cond.wait(&mut signaled);
                }
                true
            }
            Some(dur) => {
                let deadline = Instant::now() + dur;
                while !*signaled {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        return *signaled;
                    }
                }
                true
            }
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
