//! Minimal wait-group: tracks in-flight part tasks so `Engine::wait` can
//! block until every spawned and respawned part has finished.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        *self.count.lock().unwrap() += n;
    }

    /// Marks one tracked task as finished. Wakes `wait` once the count reaches zero.
    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cvar.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count != 0 {
            count = self.cvar.wait(count).unwrap();
        }
    }
}
