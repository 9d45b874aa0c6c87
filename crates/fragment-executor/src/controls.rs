//! Pausable execution controls.
//!
//! Pause sites are armed ahead of time (usually by tests or diagnostics).
//! When execution reaches an armed site it blocks until `unpause_all`.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

#[derive(Debug, Default)]
struct PauseState {
    armed: HashSet<String>,
    paused: usize,
    generation: u64,
}

/// Pause/resume controls shared by a fragment's operators.
#[derive(Debug, Default)]
pub struct ExecutionControls {
    state: Mutex<PauseState>,
    resumed: Condvar,
}

impl ExecutionControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot pause at `site`.
    pub fn arm_pause(&self, site: impl Into<String>) {
        self.state.lock().armed.insert(site.into());
    }

    /// Block here if `site` is armed. Returns whether the caller paused.
    pub fn pause_point(&self, site: &str) -> bool {
        let mut state = self.state.lock();
        if !state.armed.remove(site) {
            return false;
        }

        tracing::info!(site, "Pausing execution");
        let generation = state.generation;
        state.paused += 1;
        while state.generation == generation {
            self.resumed.wait(&mut state);
        }
        state.paused -= 1;
        tracing::info!(site, "Resuming execution");

        true
    }

    /// Release every paused thread and disarm pending pauses.
    pub fn unpause_all(&self) {
        let mut state = self.state.lock();
        state.armed.clear();
        state.generation += 1;
        self.resumed.notify_all();
    }

    /// Number of threads currently blocked at a pause site.
    pub fn paused(&self) -> usize {
        self.state.lock().paused
    }
}
